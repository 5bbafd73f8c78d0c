mod adhoc;
mod assemble;
mod dataset;
mod explain;
mod filters;
mod ident;
mod params;
mod request;

pub use adhoc::{AdhocRequest, AdhocResult};
pub use assemble::ReadPattern;
pub use dataset::Dataset;
pub use explain::{ExplainMode, ExplainRequest};
pub use params::{Binding, Bindings, CompiledStatement, ParamValue};
pub use request::QueryParams;

use crate::{
    config::AppConfig,
    db::Storage,
    error::{Result, ServiceError},
};
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct TranslateResponse {
    pub sql: String,
    pub params: Bindings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountResponse {
    pub total: u64,
}

#[derive(Clone)]
pub struct QueryEngine {
    storage: Arc<dyn Storage>,
    config: Arc<AppConfig>,
}

impl QueryEngine {
    pub fn new(storage: Arc<dyn Storage>, config: Arc<AppConfig>) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Compiles and runs one structured read pattern.
    pub async fn read(
        &self,
        dataset: Dataset,
        pattern: &ReadPattern,
        params: &QueryParams,
    ) -> Result<Vec<Value>> {
        let statement = assemble::compile(dataset, pattern, params, &self.config)?;
        debug!(%dataset, %pattern, sql = %statement.sql, params = statement.params.len(), "compiled read");
        self.storage.fetch_rows(&statement).await
    }

    pub async fn count(&self, dataset: Dataset, params: &QueryParams) -> Result<CountResponse> {
        let rows = self.read(dataset, &ReadPattern::Count, params).await?;
        let total = rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(parse_total)
            .ok_or_else(|| {
                ServiceError::Backend(format!("count for {dataset} returned no total"))
            })?;
        Ok(CountResponse { total })
    }

    pub async fn adhoc(&self, request: AdhocRequest) -> Result<AdhocResult> {
        let limit = request.limit.unwrap_or(self.config.adhoc_default_limit);
        let statement = adhoc::compile(&request.query, limit)?;
        debug!(sql = %statement.sql, "compiled ad-hoc statement");

        let started = Instant::now();
        let data = self.storage.fetch_rows(&statement).await?;
        let duration = started.elapsed().as_millis() as u64;

        Ok(AdhocResult {
            row_count: data.len(),
            data,
            duration,
        })
    }

    pub async fn explain(&self, request: ExplainRequest) -> Result<Vec<Value>> {
        let mode: ExplainMode = request.mode.parse()?;
        let statement = explain::compile(mode, &request.query)?;
        debug!(?mode, sql = %statement.sql, "compiled explain");

        if mode.is_plain_text() {
            let text = self.storage.fetch_text(&statement).await?;
            Ok(explain::wrap_lines(&text))
        } else {
            self.storage.fetch_rows(&statement).await
        }
    }

    /// Compiles without executing.
    pub fn translate(
        &self,
        dataset: Dataset,
        pattern: &ReadPattern,
        params: &QueryParams,
    ) -> Result<TranslateResponse> {
        let statement = assemble::compile(dataset, pattern, params, &self.config)?;
        Ok(TranslateResponse {
            sql: statement.sql,
            params: statement.params,
        })
    }
}

/// JSONEachRow quotes 64-bit integers by default.
fn parse_total(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
