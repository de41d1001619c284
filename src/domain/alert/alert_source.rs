use async_trait::async_trait;

use crate::domain::alert::alert_record::AlertRecord;
use crate::errors::SourceError;

/// Result of a fetch that reached at least one backend.
#[derive(Debug, Default)]
pub struct Fetched {
    pub alerts: Vec<AlertRecord>,
    /// Set when some backends failed; `alerts` then holds the survivors only.
    pub partial: Option<SourceError>,
}

impl Fetched {
    pub fn complete(alerts: Vec<AlertRecord>) -> Self {
        Self {
            alerts,
            partial: None,
        }
    }
}

/// Capability that retrieves the currently firing alerts.
///
/// Implementations return `Err` only when no usable data was obtained. A
/// degraded result is returned as `Ok` with [`Fetched::partial`] set so the
/// cache keeps the subset that succeeded.
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn fetch_alerts(&self) -> Result<Fetched, SourceError>;

    /// Short identifier used in logs.
    fn describe(&self) -> String;
}
