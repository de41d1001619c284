/// Kubernetes resource types used by the node client.
pub use k8s_openapi::api::core::v1::{Node, NodeCondition as K8sNodeCondition};
