pub mod alert_cache;
pub mod alert_record;
pub mod alert_source;
pub mod matcher;
