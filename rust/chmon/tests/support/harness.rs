use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use chmon::{
    config::AppConfig,
    db::Storage,
    error::{Result, ServiceError},
    query::CompiledStatement,
    server::Server,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, Once};
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";

static TRACING_INIT: Once = Once::new();

/// In-memory storage that records every statement it is asked to run.
#[derive(Default)]
pub struct RecordingStorage {
    rows: Vec<Value>,
    text: String,
    failure: Option<String>,
    executed: Mutex<Vec<CompiledStatement>>,
}

impl RecordingStorage {
    pub fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    fn record(&self, statement: &CompiledStatement) -> Result<()> {
        self.executed
            .lock()
            .expect("statement log poisoned")
            .push(statement.clone());
        match &self.failure {
            Some(message) => Err(ServiceError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn fetch_rows(&self, statement: &CompiledStatement) -> Result<Vec<Value>> {
        self.record(statement)?;
        Ok(self.rows.clone())
    }

    async fn fetch_text(&self, statement: &CompiledStatement) -> Result<String> {
        self.record(statement)?;
        Ok(self.text.clone())
    }
}

#[derive(Clone)]
pub struct TestHarness {
    router: Router,
    storage: Arc<RecordingStorage>,
    api_key: Option<String>,
}

impl TestHarness {
    pub fn new(storage: RecordingStorage) -> Self {
        Self::build(storage, None)
    }

    /// A harness whose server requires [`API_KEY`] on every `/api` route.
    pub fn secured(storage: RecordingStorage) -> Self {
        Self::build(storage, Some(API_KEY.to_string()))
    }

    fn build(storage: RecordingStorage, api_key: Option<String>) -> Self {
        TRACING_INIT.call_once(|| {
            let _ = tracing_subscriber::fmt::try_init();
        });

        let mut config = AppConfig::embedded("http://127.0.0.1:8123");
        config.api_key = api_key.clone();

        let storage = Arc::new(storage);
        let server = Server::with_storage(config, storage.clone());
        Self {
            router: server.router(),
            storage,
            api_key,
        }
    }

    /// Statements that reached storage, in execution order.
    pub fn executed(&self) -> Vec<CompiledStatement> {
        self.storage
            .executed
            .lock()
            .expect("statement log poisoned")
            .clone()
    }

    pub async fn get(&self, uri: &str) -> http::Response<Body> {
        let request = self
            .builder("GET", uri, true)
            .body(Body::empty())
            .expect("failed to build harness request");
        self.send(request).await
    }

    pub async fn get_without_api_key(&self, uri: &str) -> http::Response<Body> {
        let request = self
            .builder("GET", uri, false)
            .body(Body::empty())
            .expect("failed to build harness request");
        self.send(request).await
    }

    pub async fn post<T>(&self, uri: &str, payload: &T) -> http::Response<Body>
    where
        T: Serialize,
    {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        let request = self
            .builder("POST", uri, true)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("failed to build harness request");
        self.send(request).await
    }

    fn builder(&self, method: &str, uri: &str, include_api_key: bool) -> http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if include_api_key {
            if let Some(key) = &self.api_key {
                builder = builder.header("x-api-key", key);
            }
        }
        builder
    }

    async fn send(&self, request: Request<Body>) -> http::Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should deserialize");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}
