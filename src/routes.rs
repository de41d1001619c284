use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::errors::{internal_error, AppError};

/// Build the metrics and health router
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .fallback(handler_404)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "node-alert-sync is running"
}

async fn health_check() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "source": state.cache.source_description(),
        "cachedAlerts": state.cache.cached_count().await,
    }))
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buf)
        .map_err(internal_error)?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buf))
}

async fn handler_404() -> AppError {
    AppError::NotFound("the requested resource was not found".into())
}
