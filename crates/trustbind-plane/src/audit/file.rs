//! JSON-lines audit sink
//!
//! One record per line. Every append is flushed and `sync_data`'d before
//! the call returns, so an acknowledged record survives a crash.
//!
//! A failed append is truncated back to the previous file length. A crash
//! mid-append can still leave an unterminated last line; it was never
//! acknowledged, so it is dropped when the file is opened or read.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{AuditError, AuditRecord, AuditSink};

/// Append-only JSON-lines audit file
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Open (or create) the audit file for appending
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        truncate_torn_tail(&path).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), "Opened audit log");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        let start = file.metadata().await?.len();

        if let Err(e) = write_line(&mut file, &line).await {
            warn!(
                path = %self.path.display(),
                sequence = record.sequence,
                error = %e,
                "Audit append failed; truncating partial line"
            );
            if let Err(truncate) = file.set_len(start).await {
                error!(
                    path = %self.path.display(),
                    error = %truncate,
                    "SECURITY: could not truncate partial audit line"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn tail(&self) -> Result<Option<AuditRecord>, AuditError> {
        Ok(read_records(&self.path).await?.pop())
    }

    fn description(&self) -> &'static str {
        "JSON-lines audit file"
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Length of `content` up to and including its last newline
fn terminated_len(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1)
}

async fn truncate_torn_tail(path: &Path) -> Result<(), AuditError> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let keep = terminated_len(&content);
    if keep < content.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = content.len() - keep,
            "Truncating unterminated final audit line"
        );
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(keep as u64).await?;
        file.sync_all().await?;
    }
    Ok(())
}

/// Read every record from a JSON-lines audit file
///
/// A missing file reads as an empty trail. An unterminated final line is
/// ignored; any other line that does not parse is `CorruptLine`.
pub async fn read_records(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>, AuditError> {
    let path = path.as_ref();
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let keep = terminated_len(&content);
    if keep < content.len() {
        warn!(path = %path.display(), "Ignoring unterminated final audit line");
    }

    String::from_utf8_lossy(&content[..keep])
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| AuditError::CorruptLine {
                line: i + 1,
                source,
            })
        })
        .collect()
}
