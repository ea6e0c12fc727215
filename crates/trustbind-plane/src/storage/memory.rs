//! In-memory snapshot store
//!
//! Nothing survives a restart. Used by tests and by `serve` setups that do
//! not care about drift detection.

use async_trait::async_trait;
use std::sync::RwLock;

use super::{PersistedSnapshot, SnapshotStore, StorageError};

#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: RwLock<Option<PersistedSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), StorageError> {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedSnapshot>, StorageError> {
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(s) = &snapshot {
            s.verify()?;
        }
        Ok(snapshot)
    }

    fn description(&self) -> &'static str {
        "in-memory snapshot store"
    }
}
