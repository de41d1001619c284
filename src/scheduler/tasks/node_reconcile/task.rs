use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::client::kube_resources::Node;
use crate::core::client::nodes::KubeNodeClient;
use crate::domain::node::reconcile_driver::{ReconcileDriver, ReconcileOutcome};
use crate::errors::ReconcileError;

pub type NodeDriver = ReconcileDriver<KubeNodeClient>;

/// Delay before retrying a node whose reconcile failed.
pub const ERROR_REQUEUE: Duration = Duration::from_secs(15);

/// Watches Nodes and reconciles each one, up to `workers` at a time, until
/// `shutdown` fires.
pub async fn run(client: Client, driver: Arc<NodeDriver>, workers: u16, shutdown: CancellationToken) {
    let nodes: Api<Node> = Api::all(client);
    info!(workers, resync = ?driver.resync_interval(), "node controller started");

    Controller::new(nodes, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(workers))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, driver)
        .for_each(|result| async move {
            match result {
                Ok((node, _)) => debug!(node = %node.name, "reconciled"),
                Err(err) => warn!(error = %err, "node controller error"),
            }
        })
        .await;

    info!("node controller stopped");
}

async fn reconcile(node: Arc<Node>, driver: Arc<NodeDriver>) -> Result<Action, ReconcileError> {
    let name = node.name_any();
    let action = match driver.reconcile_node(&name).await? {
        ReconcileOutcome::NodeNotFound => Action::await_change(),
        ReconcileOutcome::Unchanged | ReconcileOutcome::Patched => Action::requeue(driver.resync_interval()),
    };
    Ok(action)
}

fn error_policy(node: Arc<Node>, err: &ReconcileError, _driver: Arc<NodeDriver>) -> Action {
    warn!(node = %node.name_any(), error = %err, "reconcile failed");
    Action::requeue(ERROR_REQUEUE)
}
