use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::state::runtime::alerts::alert_snapshot::AlertSnapshot;

/// Reader/writer-locked holder of the current [`AlertSnapshot`].
#[derive(Default)]
pub struct AlertSnapshotRepository {
    state: RwLock<Arc<AlertSnapshot>>,
}

impl AlertSnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared Arc snapshot (zero cost).
    pub async fn get(&self) -> Arc<AlertSnapshot> {
        self.state.read().await.clone()
    }

    /// Replace entire snapshot atomically.
    pub async fn set(&self, snapshot: AlertSnapshot) {
        let mut guard = self.state.write().await;
        *guard = Arc::new(snapshot);
    }
}
