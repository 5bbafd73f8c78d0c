use crate::{config::AppConfig, db::Storage, query::QueryEngine};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub query: QueryEngine,
}

impl AppState {
    /// Wires the engine to `storage`; every request shares both.
    pub fn new(config: Arc<AppConfig>, storage: Arc<dyn Storage>) -> Self {
        let query = QueryEngine::new(storage, Arc::clone(&config));
        Self { config, query }
    }
}
