use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::core::client::prometheus_client::PrometheusClient;
use crate::domain::alert::alert_source::{AlertSource, Fetched};
use crate::errors::SourceError;

/// Fans out to several Prometheus servers and unions their firing alerts.
///
/// Any failing backend turns the result partial; only when every backend
/// fails is the fetch an error.
pub struct MultiPrometheusClient {
    backends: Vec<PrometheusClient>,
}

impl MultiPrometheusClient {
    pub fn new(backends: Vec<PrometheusClient>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl AlertSource for MultiPrometheusClient {
    async fn fetch_alerts(&self) -> Result<Fetched, SourceError> {
        let total = self.backends.len();
        let results = join_all(self.backends.iter().map(|b| b.fetch_alerts())).await;

        let mut alerts = Vec::new();
        let mut errors = Vec::new();
        for (backend, result) in self.backends.iter().zip(results) {
            match result {
                Ok(fetched) => {
                    if let Some(err) = fetched.partial {
                        errors.push(format!("{}: {err}", backend.describe()));
                    }
                    alerts.extend(fetched.alerts);
                }
                Err(err) => {
                    warn!(backend = %backend.describe(), error = %err, "prometheus backend failed");
                    errors.push(err.to_string());
                }
            }
        }

        if errors.is_empty() {
            return Ok(Fetched::complete(alerts));
        }

        let failed = errors.len();
        let combined = SourceError::Combined {
            failed,
            total,
            errors,
        };
        if failed == total && alerts.is_empty() {
            return Err(combined);
        }

        Ok(Fetched {
            alerts,
            partial: Some(combined),
        })
    }

    fn describe(&self) -> String {
        let names: Vec<String> = self.backends.iter().map(|b| b.describe()).collect();
        format!("multi[{}]", names.join(", "))
    }
}
