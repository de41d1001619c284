use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

use crate::core::client::kube_resources::Node;
use crate::core::client::mappers::{conditions_status_patch, map_node_conditions};
use crate::domain::node::node_condition::NodeCondition;
use crate::domain::node::node_status_client::NodeStatusClient;
use crate::errors::ReconcileError;

/// Node status access through the Kubernetes API.
#[derive(Clone)]
pub struct KubeNodeClient {
    nodes: Api<Node>,
}

impl KubeNodeClient {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeStatusClient for KubeNodeClient {
    async fn get_node_conditions(&self, name: &str) -> Result<Option<Vec<NodeCondition>>, ReconcileError> {
        let Some(node) = self.nodes.get_opt(name).await? else {
            return Ok(None);
        };
        map_node_conditions(&node).map(Some)
    }

    async fn patch_node_conditions(&self, name: &str, conditions: &[NodeCondition]) -> Result<(), ReconcileError> {
        let patch = conditions_status_patch(conditions)?;
        self.nodes
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        debug!(node = %name, "patched node status");
        Ok(())
    }
}
