pub mod alert_refresh;
pub mod node_reconcile;
