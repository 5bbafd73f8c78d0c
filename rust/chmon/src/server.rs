use crate::{
    config::AppConfig,
    db::{ClickHouseClient, Storage},
    error::{Result, ServiceError},
    query::{
        AdhocRequest, AdhocResult, CountResponse, Dataset, ExplainRequest, QueryParams, ReadPattern,
        TranslateResponse,
    },
    state::AppState,
};
use axum::{
    extract::{Path, Query, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
    clickhouse: Option<ClickHouseClient>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslateTarget {
    #[serde(default)]
    field: Option<String>,
}

impl Server {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let clickhouse = ClickHouseClient::new(&config)?;
        let mut server = Self::with_storage(config, Arc::new(clickhouse.clone()));
        server.clickhouse = Some(clickhouse);
        Ok(server)
    }

    /// Builds a server over any storage backend; no connectivity check is made.
    pub fn with_storage(config: AppConfig, storage: Arc<dyn Storage>) -> Self {
        let config = Arc::new(config);
        let state = AppState::new(Arc::clone(&config), storage);
        Self {
            config,
            state,
            clickhouse: None,
        }
    }

    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/adhoc", post(Self::adhoc))
            .route("/explain", post(Self::explain))
            .route("/:dataset", get(Self::list))
            .route("/:dataset/count", get(Self::count))
            .route("/:dataset/timeseries", get(Self::timeseries))
            .route("/:dataset/stacked", get(Self::stacked))
            .route("/:dataset/summary", get(Self::summary))
            .route("/:dataset/histogram/:field", get(Self::histogram))
            .route("/:dataset/distinct/:field", get(Self::distinct))
            .route("/:dataset/translate/:pattern", get(Self::translate))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_api_key,
            ));

        Router::new()
            .route("/healthz", get(Self::health))
            .nest("/api", api)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        if let Some(clickhouse) = &self.clickhouse {
            clickhouse.ping().await;
        }
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "chmon listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health() -> Json<Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn list(
        State(state): State<AppState>,
        Path(dataset): Path<String>,
        Query(params): Query<QueryParams>,
    ) -> Result<Json<Vec<Value>>> {
        let dataset: Dataset = dataset.parse()?;
        let rows = state.query.read(dataset, &ReadPattern::List, &params).await?;
        Ok(Json(rows))
    }

    async fn count(
        State(state): State<AppState>,
        Path(dataset): Path<String>,
        Query(params): Query<QueryParams>,
    ) -> Result<Json<CountResponse>> {
        let dataset: Dataset = dataset.parse()?;
        let response = state.query.count(dataset, &params).await?;
        Ok(Json(response))
    }

    async fn timeseries(
        State(state): State<AppState>,
        Path(dataset): Path<String>,
        Query(params): Query<QueryParams>,
    ) -> Result<Json<Vec<Value>>> {
        let dataset: Dataset = dataset.parse()?;
        let rows = state
            .query
            .read(dataset, &ReadPattern::TimeSeries, &params)
            .await?;
        Ok(Json(rows))
    }

    async fn stacked(
        State(state): State<AppState>,
        Path(dataset): Path<String>,
        Query(params): Query<QueryParams>,
    ) -> Result<Json<Vec<Value>>> {
        let dataset: Dataset = dataset.parse()?;
        let rows = state
            .query
            .read(dataset, &ReadPattern::Stacked, &params)
            .await?;
        Ok(Json(rows))
    }

    async fn summary(
        State(state): State<AppState>,
        Path(dataset): Path<String>,
        Query(params): Query<QueryParams>,
    ) -> Result<Json<Vec<Value>>> {
        let dataset: Dataset = dataset.parse()?;
        let rows = state
            .query
            .read(dataset, &ReadPattern::Summary, &params)
            .await?;
        Ok(Json(rows))
    }

    async fn histogram(
        State(state): State<AppState>,
        Path((dataset, field)): Path<(String, String)>,
        Query(params): Query<QueryParams>,
    ) -> Result<Json<Vec<Value>>> {
        let dataset: Dataset = dataset.parse()?;
        let rows = state
            .query
            .read(dataset, &ReadPattern::Histogram(field), &params)
            .await?;
        Ok(Json(rows))
    }

    async fn distinct(
        State(state): State<AppState>,
        Path((dataset, field)): Path<(String, String)>,
        Query(params): Query<QueryParams>,
    ) -> Result<Json<Vec<Value>>> {
        let dataset: Dataset = dataset.parse()?;
        let rows = state
            .query
            .read(dataset, &ReadPattern::Distinct(field), &params)
            .await?;
        Ok(Json(rows))
    }

    async fn translate(
        State(state): State<AppState>,
        Path((dataset, pattern)): Path<(String, String)>,
        Query(params): Query<QueryParams>,
        Query(target): Query<TranslateTarget>,
    ) -> Result<Json<TranslateResponse>> {
        let dataset: Dataset = dataset.parse()?;
        let pattern = ReadPattern::parse(&pattern, target.field.as_deref())?;
        let response = state.query.translate(dataset, &pattern, &params)?;
        Ok(Json(response))
    }

    async fn adhoc(
        State(state): State<AppState>,
        Json(request): Json<AdhocRequest>,
    ) -> Result<Json<AdhocResult>> {
        let result = state.query.adhoc(request).await?;
        Ok(Json(result))
    }

    async fn explain(
        State(state): State<AppState>,
        Json(request): Json<ExplainRequest>,
    ) -> Result<Json<Vec<Value>>> {
        let rows = state.query.explain(request).await?;
        Ok(Json(rows))
    }
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    enforce_api_key(request.headers(), &state.config)?;
    Ok(next.run(request).await)
}

fn enforce_api_key(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}
