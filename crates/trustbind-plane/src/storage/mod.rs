//! Snapshot persistence
//!
//! The published binding set is saved after every successful publication
//! so that its revision survives restarts and so that a later compile can be
//! checked for drift against what was actually served.

pub mod file;
pub mod memory;

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trustbind_core::{records_digest, Binding, BindingSet, BindingSetDiff};

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored records do not match the stored digest
    #[error("Persisted snapshot is corrupt: {0}")]
    Corrupt(String),
}

/// A binding set as written to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub revision: u64,

    /// [`records_digest`] over `records`
    pub digest: String,

    pub saved_at: DateTime<Utc>,

    /// Binding records ordered by key
    pub records: Vec<Binding>,
}

impl PersistedSnapshot {
    pub fn from_set(set: &BindingSet) -> Self {
        let records = set.records();
        Self {
            revision: set.revision(),
            digest: records_digest(&records),
            saved_at: Utc::now(),
            records,
        }
    }

    /// Recompute the digest and compare it with the stored one
    pub fn verify(&self) -> Result<(), StorageError> {
        let actual = records_digest(&self.records);
        if actual != self.digest {
            return Err(StorageError::Corrupt(format!(
                "digest {} does not match records ({})",
                self.digest, actual
            )));
        }
        Ok(())
    }

    /// Drift from this snapshot to a freshly compiled set
    pub fn diff(&self, compiled: &BindingSet) -> BindingSetDiff {
        BindingSetDiff::between(&self.records, &compiled.records())
    }
}

/// Storage backend for the published snapshot
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot
    async fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), StorageError>;

    /// The stored snapshot, if any; verified against its digest
    async fn load(&self) -> Result<Option<PersistedSnapshot>, StorageError>;

    fn description(&self) -> &'static str;
}
