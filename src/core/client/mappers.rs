/// Maps k8s-openapi node conditions to and from the internal domain model.
///
/// Conversion goes through the wire representation so timestamps are handled
/// by serde on both sides.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::client::kube_resources::{K8sNodeCondition, Node};
use crate::domain::node::node_condition::NodeCondition;
use crate::errors::ReconcileError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionWire {
    #[serde(rename = "type")]
    type_: String,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_heartbeat_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_transition_time: Option<DateTime<Utc>>,
}

impl From<ConditionWire> for NodeCondition {
    fn from(w: ConditionWire) -> Self {
        Self {
            condition_type: w.type_,
            status: w.status,
            reason: w.reason.unwrap_or_default(),
            message: w.message.unwrap_or_default(),
            last_heartbeat_time: w.last_heartbeat_time,
            last_transition_time: w.last_transition_time,
        }
    }
}

impl From<&NodeCondition> for ConditionWire {
    fn from(c: &NodeCondition) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            type_: c.condition_type.clone(),
            status: c.status.clone(),
            reason: non_empty(&c.reason),
            message: non_empty(&c.message),
            last_heartbeat_time: c.last_heartbeat_time,
            last_transition_time: c.last_transition_time,
        }
    }
}

fn conversion_error(err: serde_json::Error) -> ReconcileError {
    ReconcileError::Conversion(err.to_string())
}

/// Converts a k8s-openapi NodeCondition into the domain type
pub fn map_condition_to_domain(condition: &K8sNodeCondition) -> Result<NodeCondition, ReconcileError> {
    let value = serde_json::to_value(condition).map_err(conversion_error)?;
    let wire: ConditionWire = serde_json::from_value(value).map_err(conversion_error)?;
    Ok(wire.into())
}

/// Conditions of a node in API order; a node without status has none.
pub fn map_node_conditions(node: &Node) -> Result<Vec<NodeCondition>, ReconcileError> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| conditions.iter().map(map_condition_to_domain).collect())
        .unwrap_or_else(|| Ok(Vec::new()))
}

/// Merge patch body replacing `status.conditions`.
pub fn conditions_status_patch(conditions: &[NodeCondition]) -> Result<Value, ReconcileError> {
    let wire: Vec<ConditionWire> = conditions.iter().map(ConditionWire::from).collect();
    let conditions = serde_json::to_value(wire).map_err(conversion_error)?;
    Ok(json!({ "status": { "conditions": conditions } }))
}
