use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use regex::Regex;
use reqwest::{Client, Url};
use validator::{Validate, ValidationError};

use crate::core::client::alertmanager_client::AlertmanagerClient;
use crate::core::client::multi_prometheus_client::MultiPrometheusClient;
use crate::core::client::prometheus_client::PrometheusClient;
use crate::domain::alert::alert_source::AlertSource;
use crate::domain::alert::matcher::expression::MatchExpression;
use crate::domain::alert::matcher::label_matcher::LabelMatcherTemplate;
use crate::domain::alert::matcher::NodeMatcher;
use crate::errors::MatchError;

/// Process configuration, read from flags, the environment and `.env`.
#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "node-alert-sync", version, about = "Sync alerts to Kubernetes Node conditions")]
#[validate(schema(function = "validate_backends"))]
pub struct Config {
    /// Alertmanager base URL.
    #[arg(long, env = "NODE_ALERT_SYNC_ALERTMANAGER_URL")]
    #[validate(url)]
    pub alertmanager_url: Option<String>,

    /// Alertmanager receiver to read alerts for (regex).
    #[arg(long, env = "NODE_ALERT_SYNC_ALERT_RECEIVER")]
    pub alert_receiver: Option<String>,

    /// Also fetch silenced alerts from Alertmanager.
    #[arg(long, env = "NODE_ALERT_SYNC_ALERT_SILENCED")]
    pub alert_silenced: bool,

    /// Prometheus base URLs, comma separated.
    #[arg(long, env = "NODE_ALERT_SYNC_PROMETHEUS_URLS", value_delimiter = ',')]
    pub prometheus_urls: Vec<String>,

    /// Label matcher template, e.g. `instance=~"{{ShortName}}(:\d+)?"`.
    #[arg(long, env = "NODE_ALERT_SYNC_NODE_FILTERS")]
    pub node_filters: Option<String>,

    /// Boolean match expression over `labels`, `FullName` and `ShortName`.
    #[arg(long, env = "NODE_ALERT_SYNC_NODE_EXPRESSION")]
    pub node_expression: Option<String>,

    #[arg(long, env = "NODE_ALERT_SYNC_CONDITION_PREFIX", default_value = "AlertManager_")]
    #[validate(length(min = 1))]
    pub condition_prefix: String,

    /// Refresh interval of the alert cache; also bounds each fetch.
    #[arg(long, env = "NODE_ALERT_SYNC_ALERT_CACHE_TTL", default_value = "60s", value_parser = parse_duration)]
    pub alert_cache_ttl: Duration,

    #[arg(long, env = "NODE_ALERT_SYNC_NODE_RESYNC", default_value = "2m", value_parser = parse_duration)]
    pub node_resync: Duration,

    #[arg(long, env = "NODE_ALERT_SYNC_RECONCILE_TIMEOUT", default_value = "45s", value_parser = parse_duration)]
    pub reconcile_timeout: Duration,

    #[arg(long, env = "NODE_ALERT_SYNC_MAX_CONCURRENT_RECONCILES", default_value_t = 1)]
    #[validate(range(min = 1))]
    pub max_concurrent_reconciles: u16,

    /// How long resolved conditions are kept; `0` keeps them forever.
    #[arg(long, env = "NODE_ALERT_SYNC_LINGER_DURATION", default_value = "96h", value_parser = parse_duration)]
    pub linger_duration: Duration,

    #[arg(long, env = "NODE_ALERT_SYNC_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Human-readable debug logging.
    #[arg(long, env = "NODE_ALERT_SYNC_DEV_MODE")]
    pub dev_mode: bool,
}

fn invalid(code: &'static str, message: String) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

fn validate_backends(cfg: &Config) -> Result<(), ValidationError> {
    match (&cfg.alertmanager_url, cfg.prometheus_urls.is_empty()) {
        (Some(_), false) => {
            return Err(invalid(
                "backend",
                "only one of alertmanager-url and prometheus-urls may be set".into(),
            ))
        }
        (None, true) => {
            return Err(invalid(
                "backend",
                "one of alertmanager-url or prometheus-urls is required".into(),
            ))
        }
        (Some(_), true) => match cfg.alert_receiver.as_deref() {
            None | Some("") => {
                return Err(invalid(
                    "receiver",
                    "alert-receiver is required with alertmanager-url".into(),
                ))
            }
            Some(receiver) => {
                Regex::new(receiver)
                    .map_err(|e| invalid("receiver", format!("alert-receiver is not a valid regex: {e}")))?;
            }
        },
        (None, false) => {
            for url in &cfg.prometheus_urls {
                Url::parse(url).map_err(|e| invalid("prometheus_urls", format!("invalid URL {url:?}: {e}")))?;
            }
        }
    }

    match (&cfg.node_filters, &cfg.node_expression) {
        (Some(_), Some(_)) => {
            return Err(invalid(
                "matcher",
                "only one of node-filters and node-expression may be set".into(),
            ))
        }
        (None, None) => {
            return Err(invalid(
                "matcher",
                "one of node-filters or node-expression is required".into(),
            ))
        }
        _ => {}
    }

    if cfg.alert_cache_ttl.is_zero() {
        return Err(invalid("alert_cache_ttl", "alert-cache-ttl must be non-zero".into()));
    }
    if cfg.node_resync.is_zero() {
        return Err(invalid("node_resync", "node-resync must be non-zero".into()));
    }

    Ok(())
}

impl Config {
    /// Builds the alert source for the configured backend family.
    pub fn build_source(&self, client: Client) -> Arc<dyn AlertSource> {
        match &self.alertmanager_url {
            Some(url) => Arc::new(AlertmanagerClient::new(
                client,
                url,
                self.alert_receiver.as_deref().unwrap_or_default(),
                self.alert_silenced,
            )),
            None if self.prometheus_urls.len() == 1 => {
                Arc::new(PrometheusClient::new(client, &self.prometheus_urls[0]))
            }
            None => Arc::new(MultiPrometheusClient::new(
                self.prometheus_urls
                    .iter()
                    .map(|url| PrometheusClient::new(client.clone(), url))
                    .collect(),
            )),
        }
    }

    /// Compiles the configured match engine.
    pub fn build_matcher(&self) -> Result<Arc<dyn NodeMatcher>, MatchError> {
        match (&self.node_filters, &self.node_expression) {
            (Some(template), _) => Ok(Arc::new(LabelMatcherTemplate::compile(template)?)),
            (None, Some(expression)) => Ok(Arc::new(MatchExpression::compile(expression)?)),
            (None, None) => Err(MatchError::Template("no node matcher configured".into())),
        }
    }
}

/// Parses durations such as `90s`, `1h30m`, `250ms` or `0`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".into());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if num_len == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        rest = &rest[unit_len..];
        total += value * seconds;
    }

    Duration::try_from_secs_f64(total).map_err(|e| format!("invalid duration {input:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["node-alert-sync"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parses_go_style_durations() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("96h").unwrap(), Duration::from_secs(96 * 3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_rejects_bad_durations() {
        for bad in ["", "10", "s", "5d", "1h-5m"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_defaults_apply() {
        let cfg = parse(&[
            "--alertmanager-url",
            "http://alertmanager:9093",
            "--alert-receiver",
            "node-conditions",
            "--node-filters",
            r#"instance=~"{{ShortName}}(:\d+)?""#,
        ]);
        assert_eq!(cfg.condition_prefix, "AlertManager_");
        assert_eq!(cfg.alert_cache_ttl, Duration::from_secs(60));
        assert_eq!(cfg.node_resync, Duration::from_secs(120));
        assert_eq!(cfg.linger_duration, Duration::from_secs(96 * 3600));
        assert_eq!(cfg.max_concurrent_reconciles, 1);
        assert!(!cfg.alert_silenced);
        assert!(cfg.validate().is_ok());
        assert!(cfg.build_matcher().is_ok());
    }

    #[test]
    fn test_splits_prometheus_urls() {
        let cfg = parse(&[
            "--prometheus-urls",
            "http://prom-a:9090,http://prom-b:9090",
            "--node-expression",
            r#"labels.instance == ShortName"#,
        ]);
        assert_eq!(cfg.prometheus_urls.len(), 2);
        assert!(cfg.validate().is_ok());
        assert!(cfg.build_source(Client::new()).describe().starts_with("multi["));
    }

    #[test]
    fn test_requires_exactly_one_backend() {
        let none = parse(&["--node-expression", "true"]);
        assert!(none.validate().is_err());

        let both = parse(&[
            "--alertmanager-url",
            "http://am:9093",
            "--alert-receiver",
            "r",
            "--prometheus-urls",
            "http://prom:9090",
            "--node-expression",
            "true",
        ]);
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_requires_exactly_one_matcher() {
        let none = parse(&["--prometheus-urls", "http://prom:9090"]);
        assert!(none.validate().is_err());

        let both = parse(&[
            "--prometheus-urls",
            "http://prom:9090",
            "--node-filters",
            "instance=\"{{FullName}}\"",
            "--node-expression",
            "true",
        ]);
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_alertmanager_needs_a_valid_receiver() {
        let missing = parse(&["--alertmanager-url", "http://am:9093", "--node-expression", "true"]);
        assert!(missing.validate().is_err());

        let bad_regex = parse(&[
            "--alertmanager-url",
            "http://am:9093",
            "--alert-receiver",
            "nodes(",
            "--node-expression",
            "true",
        ]);
        assert!(bad_regex.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_prefix_and_zero_workers() {
        let base = ["--prometheus-urls", "http://prom:9090", "--node-expression", "true"];

        let mut args = base.to_vec();
        args.extend(["--condition-prefix", ""]);
        assert!(parse(&args).validate().is_err());

        let mut args = base.to_vec();
        args.extend(["--max-concurrent-reconciles", "0"]);
        assert!(parse(&args).validate().is_err());
    }

    #[test]
    fn test_broken_expression_fails_to_build() {
        let cfg = parse(&["--prometheus-urls", "http://prom:9090", "--node-expression", "labels.x =="]);
        assert!(cfg.validate().is_ok());
        assert!(cfg.build_matcher().is_err());
    }
}
