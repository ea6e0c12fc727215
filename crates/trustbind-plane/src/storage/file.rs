//! File-backed snapshot store
//!
//! Writes `bindings.json` in the state directory through a temporary file
//! and a rename, so a reader never sees a half-written snapshot.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{PersistedSnapshot, SnapshotStore, StorageError};

const SNAPSHOT_FILE: &str = "bindings.json";

pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, self.path()).await?;

        info!(
            path = %self.path().display(),
            revision = snapshot.revision,
            bindings = snapshot.records.len(),
            "Saved binding snapshot"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedSnapshot>, StorageError> {
        let body = match tokio::fs::read(self.path()).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path().display(), "No persisted snapshot");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: PersistedSnapshot = serde_json::from_slice(&body)?;
        snapshot.verify()?;
        Ok(Some(snapshot))
    }

    fn description(&self) -> &'static str {
        "file snapshot store"
    }
}
