use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failure to retrieve alerts from a backend.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{backend} request failed: {source}")]
    Http {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned HTTP {status}")]
    Status { backend: String, status: u16 },

    #[error("{backend} API error: {message}")]
    Api { backend: String, message: String },

    #[error("alert fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Some (or all) backends of a fan-out failed; messages are per backend.
    #[error("{failed} of {total} backends failed: {}", .errors.join("; "))]
    Combined {
        failed: usize,
        total: usize,
        errors: Vec<String>,
    },
}

/// Match expression compile or evaluation failure.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid node filter template: {0}")]
    Template(String),

    #[error("invalid label matcher {input:?}: {reason}")]
    Matcher { input: String, reason: String },

    #[error("invalid regex {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid expression at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("alert cache is not yet ready")]
    NotReady,

    #[error("last alert fetch failed: {0}")]
    Fetch(#[source] Arc<SourceError>),

    #[error("node match failed: {0}")]
    Match(#[from] MatchError),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("alert has no alertname label")]
    MissingAlertName,

    #[error("malformed priority {value:?} on alert {alertname}")]
    MalformedPriority { alertname: String, value: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("condition conversion failed: {0}")]
    Conversion(String),

    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Helper for mapping any unknown error into internal error
pub fn internal_error<E: ToString>(err: E) -> AppError {
    AppError::InternalServerError(err.to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(json!({
            "message": self.to_string()
        }));

        (status, body).into_response()
    }
}
