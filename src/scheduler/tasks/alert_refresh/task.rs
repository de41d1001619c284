use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::alert::alert_cache::AlertCache;

/// Maximum relative deviation of a refresh period.
pub const JITTER_FACTOR: f64 = 0.2;

/// `period` scaled by a random factor in `[1 - JITTER_FACTOR, 1 + JITTER_FACTOR]`,
/// saturating at `Duration::MAX`.
pub fn jittered(period: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(-JITTER_FACTOR..=JITTER_FACTOR);
    Duration::try_from_secs_f64(period.as_secs_f64() * (1.0 + factor)).unwrap_or(Duration::MAX)
}

/// Refreshes the alert cache on a jittered period until `shutdown` fires.
///
/// A refresh that has started runs to completion; it is bounded by the
/// cache's own fetch timeout.
pub async fn run(cache: Arc<AlertCache>, period: Duration, shutdown: CancellationToken) {
    info!(period = ?period, source = %cache.source_description(), "alert refresh loop started");

    loop {
        let wait = jittered(period);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let snapshot = cache.refresh().await;
        debug!(count = snapshot.alerts.len(), next_in = ?wait, "alert cache refreshed");
    }

    info!("alert refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::alert_source::{AlertSource, Fetched};
    use crate::domain::alert::matcher::expression::MatchExpression;
    use crate::errors::SourceError;
    use async_trait::async_trait;
    use prometheus::Registry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AlertSource for CountingSource {
        async fn fetch_alerts(&self) -> Result<Fetched, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Fetched::default())
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    fn cache(source: Arc<CountingSource>) -> Arc<AlertCache> {
        let matcher = MatchExpression::compile("true").unwrap();
        Arc::new(AlertCache::new(source, Arc::new(matcher), &Registry::new(), Duration::from_secs(5)).unwrap())
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let period = Duration::from_secs(60);
        for _ in 0..1000 {
            let d = jittered(period);
            assert!(d >= Duration::from_secs(48) && d <= Duration::from_secs(72), "{d:?}");
        }
    }

    #[test]
    fn test_jitter_saturates_on_huge_period() {
        for _ in 0..100 {
            let d = jittered(Duration::MAX);
            assert!(d >= Duration::MAX.mul_f64(0.79), "{d:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_on_period_until_cancelled() {
        let source = Arc::new(CountingSource::default());
        let token = CancellationToken::new();
        let period = Duration::from_secs(10);
        let handle = tokio::spawn(run(cache(source.clone()), period, token.clone()));

        tokio::time::sleep(Duration::from_secs(35)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = source.calls.load(Ordering::SeqCst);
        assert!((2..=4).contains(&calls), "unexpected refresh count {calls}");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_tick_never_refreshes() {
        let source = Arc::new(CountingSource::default());
        let token = CancellationToken::new();
        token.cancel();

        run(cache(source.clone()), Duration::from_secs(10), token).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
