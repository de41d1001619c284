use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::alert::alert_record::AlertRecord;
use crate::errors::SourceError;

/// Latest fetch result held by the alert cache.
///
/// A snapshot is never modified in place; each refresh builds a new one and
/// swaps it in whole.
#[derive(Debug, Clone, Default)]
pub struct AlertSnapshot {
    pub alerts: Arc<Vec<AlertRecord>>,

    /// Time of the last fetch attempt, successful or not. `None` until the
    /// first fetch completes.
    pub retrieved_at: Option<DateTime<Utc>>,

    pub last_err: Option<Arc<SourceError>>,

    /// `last_err` describes backends that failed while others succeeded.
    pub partial: bool,
}

impl AlertSnapshot {
    /// Snapshot after a fetch that returned data (possibly degraded).
    pub fn fetched(
        alerts: Vec<AlertRecord>,
        partial_err: Option<SourceError>,
        retrieved_at: DateTime<Utc>,
    ) -> Self {
        let partial = partial_err.is_some();
        Self {
            alerts: Arc::new(alerts),
            retrieved_at: Some(retrieved_at),
            last_err: partial_err.map(Arc::new),
            partial,
        }
    }

    /// Snapshot after a failed fetch: no data rather than stale data.
    pub fn failed(err: SourceError, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            alerts: Arc::new(Vec::new()),
            retrieved_at: Some(retrieved_at),
            last_err: Some(Arc::new(err)),
            partial: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.retrieved_at.is_some()
    }

    /// Error that makes the cached data unusable, if any.
    pub fn blocking_error(&self) -> Option<&Arc<SourceError>> {
        self.last_err.as_ref().filter(|_| !self.partial)
    }

    /// Error describing a degraded but usable fetch, if any.
    pub fn degraded_error(&self) -> Option<&Arc<SourceError>> {
        self.last_err.as_ref().filter(|_| self.partial)
    }
}
