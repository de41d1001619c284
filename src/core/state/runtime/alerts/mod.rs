pub mod alert_snapshot;
pub mod alert_snapshot_repository;
