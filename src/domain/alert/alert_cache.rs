use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::state::runtime::alerts::alert_snapshot::AlertSnapshot;
use crate::core::state::runtime::alerts::alert_snapshot_repository::AlertSnapshotRepository;
use crate::domain::alert::alert_record::AlertRecord;
use crate::domain::alert::alert_source::AlertSource;
use crate::domain::alert::matcher::{NodeIdentity, NodeMatcher};
use crate::errors::{CacheError, SourceError};

const FETCH_DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0];

struct AlertCacheMetrics {
    num_cached: Gauge,
    get_duration: Histogram,
    get_failures: IntCounter,
}

impl AlertCacheMetrics {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let num_cached = Gauge::with_opts(
            Opts::new("num_cached", "Number of alerts last cached").subsystem("sync"),
        )?;
        let get_duration = Histogram::with_opts(
            HistogramOpts::new("get_duration", "Time to get alerts")
                .subsystem("sync")
                .buckets(FETCH_DURATION_BUCKETS.to_vec()),
        )?;
        let get_failures = IntCounter::with_opts(
            Opts::new("get_failures", "Count of alerts get failures").subsystem("sync"),
        )?;

        registry.register(Box::new(num_cached.clone()))?;
        registry.register(Box::new(get_duration.clone()))?;
        registry.register(Box::new(get_failures.clone()))?;

        Ok(Self {
            num_cached,
            get_duration,
            get_failures,
        })
    }
}

/// Alerts applicable to one node, as of `retrieved_at`.
#[derive(Debug)]
pub struct AlertQuery {
    pub alerts: Result<Vec<AlertRecord>, CacheError>,
    /// Time of the fetch the answer is based on; `None` before the first fetch.
    pub retrieved_at: Option<DateTime<Utc>>,
    /// Partial-fetch error; the alerts are still usable when set.
    pub degraded: Option<Arc<SourceError>>,
}

/// Holds the latest alert snapshot and answers per-node queries.
///
/// Refreshes are serialized by `refresh_lock`; the fetch itself runs outside
/// the snapshot lock and the result is swapped in as one unit, so readers
/// never observe a half-written snapshot.
pub struct AlertCache {
    source: Arc<dyn AlertSource>,
    matcher: Arc<dyn NodeMatcher>,
    repo: AlertSnapshotRepository,
    refresh_lock: Mutex<()>,
    fetch_timeout: Duration,
    metrics: AlertCacheMetrics,
}

impl AlertCache {
    pub fn new(
        source: Arc<dyn AlertSource>,
        matcher: Arc<dyn NodeMatcher>,
        registry: &Registry,
        fetch_timeout: Duration,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            source,
            matcher,
            repo: AlertSnapshotRepository::new(),
            refresh_lock: Mutex::new(()),
            fetch_timeout,
            metrics: AlertCacheMetrics::register(registry)?,
        })
    }

    /// Fetches alerts once and replaces the snapshot.
    pub async fn refresh(&self) -> Arc<AlertSnapshot> {
        let _in_flight = self.refresh_lock.lock().await;
        let previous = self.repo.get().await;

        let timer = self.metrics.get_duration.start_timer();
        let result = match tokio::time::timeout(self.fetch_timeout, self.source.fetch_alerts()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.fetch_timeout)),
        };
        timer.observe_duration();

        // Second precision matches Kubernetes timestamps.
        let mut retrieved_at = Utc::now().trunc_subsecs(0);
        if let Some(prev) = previous.retrieved_at {
            retrieved_at = retrieved_at.max(prev);
        }

        let snapshot = match result {
            Ok(fetched) => {
                if let Some(err) = &fetched.partial {
                    warn!(source = %self.source.describe(), error = %err, "partial alert retrieval");
                    self.metrics.get_failures.inc();
                }
                debug!(count = fetched.alerts.len(), "alerts cached");
                AlertSnapshot::fetched(fetched.alerts, fetched.partial, retrieved_at)
            }
            Err(err) => {
                error!(source = %self.source.describe(), error = %err, "could not retrieve alerts");
                self.metrics.get_failures.inc();
                AlertSnapshot::failed(err, retrieved_at)
            }
        };
        self.metrics.num_cached.set(snapshot.alerts.len() as f64);

        self.repo.set(snapshot).await;
        self.repo.get().await
    }

    /// Returns the cached alerts whose labels match `node_name`.
    pub async fn query(&self, node_name: &str) -> AlertQuery {
        let snapshot = self.repo.get().await;
        let retrieved_at = snapshot.retrieved_at;

        let alerts = if !snapshot.is_ready() {
            Err(CacheError::NotReady)
        } else if let Some(err) = snapshot.blocking_error() {
            Err(CacheError::Fetch(err.clone()))
        } else {
            self.match_node(&snapshot, node_name)
        };

        AlertQuery {
            alerts,
            retrieved_at,
            degraded: snapshot.degraded_error().cloned(),
        }
    }

    fn match_node(&self, snapshot: &AlertSnapshot, node_name: &str) -> Result<Vec<AlertRecord>, CacheError> {
        let node = NodeIdentity::new(node_name);
        let predicate = self.matcher.bind(&node)?;

        let mut matched = Vec::new();
        for alert in snapshot.alerts.iter() {
            if predicate.test(&alert.labels)? {
                matched.push(alert.clone());
            }
        }
        Ok(matched)
    }

    /// Number of alerts in the current snapshot.
    pub async fn cached_count(&self) -> usize {
        self.repo.get().await.alerts.len()
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Runs the first refresh before the cache is handed to reconcilers.
    pub async fn prime(&self) {
        let snapshot = self.refresh().await;
        match snapshot.blocking_error() {
            Some(err) => warn!(error = %err, "initial alert fetch failed; nodes will report alerts unavailable"),
            None => info!(count = snapshot.alerts.len(), "initial alert fetch complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::alert_record::{labels, Labels};
    use crate::domain::alert::alert_source::Fetched;
    use crate::domain::alert::matcher::expression::MatchExpression;
    use crate::domain::alert::matcher::label_matcher::LabelMatcherTemplate;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedSource {
        responses: StdMutex<VecDeque<Result<Fetched, SourceError>>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn with(responses: Vec<Result<Fetched, SourceError>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AlertSource for ScriptedSource {
        async fn fetch_alerts(&self) -> Result<Fetched, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Fetched::default()))
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn alert(name: &str, node: &str) -> AlertRecord {
        AlertRecord::firing(labels([("alertname", name), ("node", node)]), Labels::new())
    }

    fn node_matcher() -> Arc<dyn NodeMatcher> {
        Arc::new(LabelMatcherTemplate::compile(r#"node="{{ShortName}}""#).unwrap())
    }

    fn cache(source: ScriptedSource, registry: &Registry) -> AlertCache {
        AlertCache::new(Arc::new(source), node_matcher(), registry, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_query_before_refresh_is_not_ready() {
        let cache = cache(ScriptedSource::default(), &Registry::new());
        let q = cache.query("worker-1").await;
        assert!(matches!(q.alerts, Err(CacheError::NotReady)));
        assert!(q.retrieved_at.is_none());
    }

    #[tokio::test]
    async fn test_refresh_then_query_matches_by_short_name() {
        let source = ScriptedSource::with(vec![Ok(Fetched::complete(vec![
            alert("DiskFull", "worker-1"),
            alert("NodeDown", "worker-2"),
        ]))]);
        let cache = cache(source, &Registry::new());
        cache.refresh().await;

        let q = cache.query("worker-1.example.com").await;
        let alerts = q.alerts.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_name(), Some("DiskFull"));
        assert!(q.retrieved_at.is_some());
        assert!(q.degraded.is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_alerts_and_fails_queries() {
        let source = ScriptedSource::with(vec![
            Ok(Fetched::complete(vec![alert("DiskFull", "worker-1")])),
            Err(SourceError::Status {
                backend: "alertmanager".into(),
                status: 503,
            }),
        ]);
        let registry = Registry::new();
        let cache = cache(source, &registry);

        let first = cache.refresh().await.retrieved_at;
        cache.refresh().await;

        let q = cache.query("worker-1").await;
        assert!(matches!(q.alerts, Err(CacheError::Fetch(_))));
        assert!(q.retrieved_at >= first);
        assert_eq!(cache.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_recovers_after_failure() {
        let source = ScriptedSource::with(vec![
            Err(SourceError::Timeout(Duration::from_secs(1))),
            Ok(Fetched::complete(vec![alert("DiskFull", "worker-1")])),
        ]);
        let cache = cache(source, &Registry::new());
        cache.refresh().await;
        assert!(cache.query("worker-1").await.alerts.is_err());

        cache.refresh().await;
        assert_eq!(cache.query("worker-1").await.alerts.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_refresh_keeps_surviving_alerts() {
        let source = ScriptedSource::with(vec![Ok(Fetched {
            alerts: vec![alert("DiskFull", "worker-1")],
            partial: Some(SourceError::Combined {
                failed: 1,
                total: 2,
                errors: vec!["prom-b: HTTP 500".into()],
            }),
        })]);
        let cache = cache(source, &Registry::new());
        cache.refresh().await;

        let q = cache.query("worker-1").await;
        assert_eq!(q.alerts.unwrap().len(), 1);
        assert!(q.degraded.is_some());
    }

    #[tokio::test]
    async fn test_multi_backend_partial_failure_is_degraded() {
        use crate::core::client::multi_prometheus_client::MultiPrometheusClient;
        use crate::core::client::prometheus_client::PrometheusClient;
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/alerts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"alerts": [
                    {"labels": {"alertname": "DiskFull", "node": "worker-1"}, "annotations": {}, "state": "firing"},
                    {"labels": {"alertname": "NodeDown", "node": "worker-2"}, "annotations": {}, "state": "firing"}
                ]}
            })))
            .mount(&healthy)
            .await;
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/alerts"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&broken)
            .await;

        let source = MultiPrometheusClient::new(vec![
            PrometheusClient::new(reqwest::Client::new(), &healthy.uri()),
            PrometheusClient::new(reqwest::Client::new(), &broken.uri()),
        ]);
        let cache =
            AlertCache::new(Arc::new(source), node_matcher(), &Registry::new(), Duration::from_secs(5)).unwrap();
        cache.refresh().await;

        let q = cache.query("worker-1.example.com").await;
        let alerts = q.alerts.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_name(), Some("DiskFull"));
        let degraded = q.degraded.expect("partial fetch is reported").to_string();
        assert!(degraded.starts_with("1 of 2 backends failed: "), "{degraded}");
        assert_eq!(cache.metrics.get_failures.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_serves_previous_snapshot_during_slow_refresh() {
        let source = Arc::new(ScriptedSource {
            responses: StdMutex::new(
                vec![
                    Ok(Fetched::complete(vec![alert("DiskFull", "worker-1")])),
                    Ok(Fetched::complete(vec![alert("NodeDown", "worker-1")])),
                ]
                .into(),
            ),
            delay: Some(Duration::from_secs(3)),
            ..Default::default()
        });
        let cache = Arc::new(
            AlertCache::new(source.clone(), node_matcher(), &Registry::new(), Duration::from_secs(5)).unwrap(),
        );
        let first = cache.refresh().await.retrieved_at;

        let slow = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 1);

        let q = cache.query("worker-1").await;
        assert_eq!(q.retrieved_at, first);
        let alerts = q.alerts.unwrap();
        assert_eq!(alerts[0].alert_name(), Some("DiskFull"));

        slow.await.unwrap();
        let alerts = cache.query("worker-1").await.alerts.unwrap();
        assert_eq!(alerts[0].alert_name(), Some("NodeDown"));
    }

    #[tokio::test]
    async fn test_expression_errors_abort_the_query() {
        let source = ScriptedSource::with(vec![Ok(Fetched::complete(vec![AlertRecord::firing(
            labels([("alertname", "X"), ("pattern", "(")]),
            Labels::new(),
        )]))]);
        let matcher = Arc::new(MatchExpression::compile("FullName =~ labels.pattern").unwrap());
        let cache =
            AlertCache::new(Arc::new(source), matcher, &Registry::new(), Duration::from_secs(5)).unwrap();
        cache.refresh().await;

        let q = cache.query("worker-1").await;
        assert!(matches!(q.alerts, Err(CacheError::Match(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_backend_times_out() {
        let source = ScriptedSource {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let cache =
            AlertCache::new(Arc::new(source), node_matcher(), &Registry::new(), Duration::from_secs(1)).unwrap();
        let snapshot = cache.refresh().await;
        assert!(matches!(
            snapshot.blocking_error().map(|e| e.as_ref()),
            Some(SourceError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_are_serialized() {
        let source = Arc::new(ScriptedSource {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let cache = AlertCache::new(source.clone(), node_matcher(), &Registry::new(), Duration::from_secs(5))
            .unwrap();

        tokio::join!(cache.refresh(), cache.refresh(), cache.refresh());
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_metrics_track_failures_and_cache_size() {
        let source = ScriptedSource::with(vec![
            Ok(Fetched::complete(vec![alert("A", "n"), alert("B", "n")])),
            Err(SourceError::Timeout(Duration::from_secs(1))),
        ]);
        let registry = Registry::new();
        let cache = cache(source, &registry);

        cache.refresh().await;
        assert_eq!(cache.metrics.num_cached.get(), 2.0);
        assert_eq!(cache.metrics.get_failures.get(), 0);

        cache.refresh().await;
        assert_eq!(cache.metrics.num_cached.get(), 0.0);
        assert_eq!(cache.metrics.get_failures.get(), 1);
        assert_eq!(cache.metrics.get_duration.get_sample_count(), 2);
    }
}
