use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use tracing::{debug, info, warn};

use crate::domain::alert::alert_cache::AlertCache;
use crate::domain::node::condition_reconciler::{AlertInput, ConditionReconciler};
use crate::domain::node::node_status_client::NodeStatusClient;
use crate::errors::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Node is gone; nothing to do and no reason to retry.
    NodeNotFound,
    Unchanged,
    Patched,
}

/// Runs one reconcile pass for a node: read conditions, match alerts,
/// compute the next conditions, patch when they differ.
pub struct ReconcileDriver<C> {
    client: C,
    cache: Arc<AlertCache>,
    reconciler: ConditionReconciler,
    resync_interval: Duration,
    reconcile_timeout: Duration,
}

impl<C: NodeStatusClient> ReconcileDriver<C> {
    pub fn new(
        client: C,
        cache: Arc<AlertCache>,
        reconciler: ConditionReconciler,
        resync_interval: Duration,
        reconcile_timeout: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            reconciler,
            resync_interval,
            reconcile_timeout,
        }
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    pub async fn reconcile_node(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        match tokio::time::timeout(self.reconcile_timeout, self.reconcile_once(name)).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::Timeout(self.reconcile_timeout)),
        }
    }

    async fn reconcile_once(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(existing) = self.client.get_node_conditions(name).await? else {
            info!(node = %name, "node not found, skipping");
            return Ok(ReconcileOutcome::NodeNotFound);
        };

        let query = self.cache.query(name).await;
        if let Some(err) = &query.degraded {
            debug!(node = %name, error = %err, "reconciling against partial alert data");
        }
        let now = query
            .retrieved_at
            .unwrap_or_else(|| Utc::now().trunc_subsecs(0));

        let input = match &query.alerts {
            Ok(alerts) => AlertInput::Matched(alerts),
            Err(err) => {
                warn!(node = %name, error = %err, "alerts unavailable");
                AlertInput::Unavailable
            }
        };

        let next = self.reconciler.reconcile(&existing, input, now)?;
        if next == existing {
            debug!(node = %name, "conditions unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        self.client.patch_node_conditions(name, &next).await?;
        debug!(node = %name, conditions = next.len(), "patched node conditions");
        Ok(ReconcileOutcome::Patched)
    }
}
