use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::alert::alert_record::{AlertRecord, AlertState, Labels};
use crate::domain::alert::alert_source::{AlertSource, Fetched};
use crate::errors::SourceError;

const BACKEND: &str = "alertmanager";

/// Subset of Alertmanager's v2 `GettableAlert`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GettableAlert {
    #[serde(default)]
    labels: Labels,
    #[serde(default)]
    annotations: Labels,
    starts_at: Option<DateTime<Utc>>,
}

impl From<GettableAlert> for AlertRecord {
    fn from(alert: GettableAlert) -> Self {
        // The endpoint is queried with active=true, so everything returned is firing.
        Self {
            labels: alert.labels,
            annotations: alert.annotations,
            state: AlertState::Firing,
            active_since: alert.starts_at,
        }
    }
}

/// Reads active alerts for a single receiver from one Alertmanager.
pub struct AlertmanagerClient {
    client: Client,
    base_url: String,
    receiver: String,
    silenced: bool,
}

impl AlertmanagerClient {
    pub fn new(client: Client, base_url: &str, receiver: &str, silenced: bool) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            receiver: receiver.to_string(),
            silenced,
        }
    }
}

#[async_trait]
impl AlertSource for AlertmanagerClient {
    async fn fetch_alerts(&self) -> Result<Fetched, SourceError> {
        let http_err = |source| SourceError::Http {
            backend: BACKEND.into(),
            source,
        };

        let resp = self
            .client
            .get(format!("{}/api/v2/alerts", self.base_url))
            .query(&[
                ("active", "true"),
                ("silenced", if self.silenced { "true" } else { "false" }),
                ("receiver", self.receiver.as_str()),
            ])
            .send()
            .await
            .map_err(http_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                backend: BACKEND.into(),
                status: status.as_u16(),
            });
        }

        let alerts: Vec<GettableAlert> = resp.json().await.map_err(http_err)?;
        debug!(count = alerts.len(), receiver = %self.receiver, "fetched alerts from alertmanager");

        Ok(Fetched::complete(alerts.into_iter().map(AlertRecord::from).collect()))
    }

    fn describe(&self) -> String {
        format!("{BACKEND}({})", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetches_active_alerts_for_receiver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/alerts"))
            .and(query_param("active", "true"))
            .and(query_param("silenced", "false"))
            .and(query_param("receiver", "node-conditions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "labels": {"alertname": "NodeOnFire", "instance": "worker-1"},
                    "annotations": {"summary": "Node has erupted into fire at 500C"},
                    "startsAt": "2020-03-18T12:33:45Z",
                    "endsAt": "2020-03-18T13:33:45Z",
                    "fingerprint": "abc",
                    "receivers": [{"name": "node-conditions"}],
                    "status": {"state": "active", "silencedBy": [], "inhibitedBy": []},
                    "updatedAt": "2020-03-18T12:33:45Z"
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = AlertmanagerClient::new(Client::new(), &server.uri(), "node-conditions", false);
        let fetched = client.fetch_alerts().await.unwrap();

        assert!(fetched.partial.is_none());
        assert_eq!(fetched.alerts.len(), 1);
        let alert = &fetched.alerts[0];
        assert_eq!(alert.alert_name(), Some("NodeOnFire"));
        assert_eq!(alert.summary(), Some("Node has erupted into fire at 500C"));
        assert!(alert.is_firing());
        assert!(alert.active_since.is_some());
    }

    #[tokio::test]
    async fn test_includes_silenced_alerts_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/alerts"))
            .and(query_param("active", "true"))
            .and(query_param("silenced", "true"))
            .and(query_param("receiver", "node-conditions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "labels": {"alertname": "NodeOnFire", "instance": "worker-1"},
                    "annotations": {},
                    "startsAt": "2020-03-18T12:33:45Z",
                    "endsAt": "2020-03-18T13:33:45Z",
                    "fingerprint": "abc",
                    "receivers": [{"name": "node-conditions"}],
                    "status": {"state": "suppressed", "silencedBy": ["s1"], "inhibitedBy": []},
                    "updatedAt": "2020-03-18T12:33:45Z"
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = AlertmanagerClient::new(Client::new(), &server.uri(), "node-conditions", true);
        let fetched = client.fetch_alerts().await.unwrap();

        assert_eq!(fetched.alerts.len(), 1);
        assert!(fetched.alerts[0].is_firing());
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/alerts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = AlertmanagerClient::new(Client::new(), &server.uri(), "r", true);
        let err = client.fetch_alerts().await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
    }
}
