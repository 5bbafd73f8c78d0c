use crate::{
    config::{AppConfig, ClickHouseConfig},
    error::{Result, ServiceError},
    query::CompiledStatement,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// Executes compiled statements. Implementations are shared across requests.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Runs `statement` and decodes one JSON object per result row.
    async fn fetch_rows(&self, statement: &CompiledStatement) -> Result<Vec<Value>>;

    /// Runs `statement` and returns its raw text output.
    async fn fetch_text(&self, statement: &CompiledStatement) -> Result<String>;
}

const ROW_FORMAT: &str = "JSONEachRow";
const TEXT_FORMAT: &str = "TabSeparatedRaw";

/// ClickHouse over its HTTP interface; bindings travel as `param_<name>`.
#[derive(Clone)]
pub struct ClickHouseClient {
    client: Client,
    config: Arc<ClickHouseConfig>,
}

impl ClickHouseClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build ClickHouse HTTP client")?;

        Ok(Self {
            client,
            config: Arc::new(config.clickhouse.clone()),
        })
    }

    /// One-time connectivity check so misconfiguration shows up at startup.
    pub async fn ping(&self) {
        let url = format!("{}/ping", self.base_url());
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(url = %self.config.url, "clickhouse connectivity check succeeded")
            }
            Ok(response) => error!(status = %response.status(), "clickhouse connectivity check failed"),
            Err(err) => error!(error = %err, "clickhouse connectivity check failed"),
        }
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn request(&self, statement: &CompiledStatement, format: &str) -> RequestBuilder {
        let mut query = vec![
            ("database".to_string(), self.config.database.clone()),
            ("default_format".to_string(), format.to_string()),
        ];
        query.extend(
            statement
                .params
                .iter()
                .map(|binding| (format!("param_{}", binding.name), binding.value.encode())),
        );

        let mut request = self
            .client
            .post(format!("{}/", self.base_url()))
            .query(&query)
            .header("X-ClickHouse-User", &self.config.user)
            .body(statement.sql.clone());
        if let Some(password) = &self.config.password {
            request = request.header("X-ClickHouse-Key", password);
        }
        request
    }

    async fn execute(&self, statement: &CompiledStatement, format: &str) -> Result<String> {
        let response = self
            .request(statement, format)
            .send()
            .await
            .map_err(|err| ServiceError::Backend(format!("clickhouse request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ServiceError::Backend(format!("failed to read clickhouse response: {err}")))?;

        if status != StatusCode::OK {
            return Err(ServiceError::Backend(body.trim().to_string()));
        }
        Ok(body)
    }
}

#[async_trait]
impl Storage for ClickHouseClient {
    async fn fetch_rows(&self, statement: &CompiledStatement) -> Result<Vec<Value>> {
        let body = self.execute(statement, ROW_FORMAT).await?;
        parse_rows(&body)
    }

    async fn fetch_text(&self, statement: &CompiledStatement) -> Result<String> {
        self.execute(statement, TEXT_FORMAT).await
    }
}

fn parse_rows(body: &str) -> Result<Vec<Value>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|err| ServiceError::Backend(format!("unreadable result row: {err}")))
        })
        .collect()
}
