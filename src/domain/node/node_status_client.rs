use async_trait::async_trait;

use crate::domain::node::node_condition::NodeCondition;
use crate::errors::ReconcileError;

/// Read and write access to Node status conditions.
#[async_trait]
pub trait NodeStatusClient: Send + Sync {
    /// `None` when the node does not exist.
    async fn get_node_conditions(&self, name: &str) -> Result<Option<Vec<NodeCondition>>, ReconcileError>;

    /// Replaces `status.conditions` on the node's status subresource.
    async fn patch_node_conditions(&self, name: &str, conditions: &[NodeCondition]) -> Result<(), ReconcileError>;
}
