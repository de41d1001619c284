use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub type Labels = BTreeMap<String, String>;

pub const ALERT_NAME_LABEL: &str = "alertname";
pub const PRIORITY_LABEL: &str = "priority";
pub const SUMMARY_ANNOTATION: &str = "summary";

/// Lifecycle state reported by a backend.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Firing,
    Pending,
    Inactive,
}

/// A single alert as observed on the last fetch. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub labels: Labels,
    pub annotations: Labels,
    pub state: AlertState,
    /// When the backend first saw the alert active, if it reports it.
    pub active_since: Option<DateTime<Utc>>,
}

impl AlertRecord {
    #[cfg(test)]
    pub fn firing(labels: Labels, annotations: Labels) -> Self {
        Self {
            labels,
            annotations,
            state: AlertState::Firing,
            active_since: None,
        }
    }

    /// Value of the `alertname` label; empty values count as missing.
    pub fn alert_name(&self) -> Option<&str> {
        self.labels
            .get(ALERT_NAME_LABEL)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn summary(&self) -> Option<&str> {
        self.annotations.get(SUMMARY_ANNOTATION).map(String::as_str)
    }

    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }
}

/// Builds a label map from `(key, value)` pairs.
#[cfg(test)]
pub fn labels<I, K, V>(pairs: I) -> Labels
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
