pub mod condition_reconciler;
pub mod node_condition;
pub mod node_status_client;
pub mod reconcile_driver;
