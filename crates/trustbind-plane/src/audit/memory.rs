//! In-memory audit sink
//!
//! Holds records in a vector. Used by tests and dry runs; it can be switched
//! unavailable or slowed down to exercise the gateway's failure paths.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use super::{AuditError, AuditRecord, AuditSink};

/// In-memory audit sink
pub struct MemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
    available: AtomicBool,
    delay: Option<Duration>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            delay: None,
        }
    }

    /// Sleep this long before every append
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of the records appended so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("memory sink switched off".into()));
        }
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn tail(&self) -> Result<Option<AuditRecord>, AuditError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned())
    }

    fn description(&self) -> &'static str {
        "in-memory audit sink"
    }
}
