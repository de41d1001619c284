use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::alert::alert_record::{AlertRecord, AlertState, Labels};
use crate::domain::alert::alert_source::{AlertSource, Fetched};
use crate::errors::SourceError;

const BACKEND: &str = "prometheus";

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    status: String,
    #[serde(default)]
    data: Option<AlertsData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlertsData {
    #[serde(default)]
    alerts: Vec<PrometheusAlert>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrometheusAlert {
    #[serde(default)]
    labels: Labels,
    #[serde(default)]
    annotations: Labels,
    state: AlertState,
    active_at: Option<DateTime<Utc>>,
}

/// Reads alerts from one Prometheus server's `/api/v1/alerts`.
pub struct PrometheusClient {
    client: Client,
    base_url: String,
}

impl PrometheusClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn backend(&self) -> String {
        format!("{BACKEND}({})", self.base_url)
    }
}

#[async_trait]
impl AlertSource for PrometheusClient {
    async fn fetch_alerts(&self) -> Result<Fetched, SourceError> {
        let http_err = |source| SourceError::Http {
            backend: self.backend(),
            source,
        };

        let resp = self
            .client
            .get(format!("{}/api/v1/alerts", self.base_url))
            .send()
            .await
            .map_err(http_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                backend: self.backend(),
                status: status.as_u16(),
            });
        }

        let body: AlertsResponse = resp.json().await.map_err(http_err)?;
        if body.status != "success" {
            return Err(SourceError::Api {
                backend: self.backend(),
                message: body.error.unwrap_or(body.status),
            });
        }

        // Prometheus also reports pending and inactive alerts.
        let alerts: Vec<AlertRecord> = body
            .data
            .map(|d| d.alerts)
            .unwrap_or_default()
            .into_iter()
            .map(|a| AlertRecord {
                labels: a.labels,
                annotations: a.annotations,
                state: a.state,
                active_since: a.active_at,
            })
            .filter(AlertRecord::is_firing)
            .collect();

        debug!(count = alerts.len(), backend = %self.base_url, "fetched firing alerts from prometheus");
        Ok(Fetched::complete(alerts))
    }

    fn describe(&self) -> String {
        self.backend()
    }
}
