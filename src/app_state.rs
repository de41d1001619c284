use std::sync::Arc;

use prometheus::Registry;

use crate::domain::alert::alert_cache::AlertCache;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<AlertCache>,
    pub registry: Registry,
}

pub fn build_app_state(cache: Arc<AlertCache>, registry: Registry) -> AppState {
    AppState { cache, registry }
}
