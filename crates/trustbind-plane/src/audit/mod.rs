//! Audit trail
//!
//! Every decision the gateway returns is first appended to an [`AuditSink`].
//! Records are hash-chained: each record's hash covers the previous record's
//! hash plus its own canonical JSON body, so a removed or edited line breaks
//! [`verify_chain`].
//!
//! Appends are serialized through [`AuditQueue`], a single writer task, so
//! records for one subject keep decision order.
//!
//! A record whose caller stopped waiting while it was being written is
//! followed by a void record (`voids = Some(sequence)`) carrying
//! `Denied(Timeout)`, the outcome the caller actually saw.

pub mod file;
pub mod memory;
pub mod queue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use trustbind_core::{Decision, DenialReason};

pub use file::{read_records, FileAuditSink};
pub use memory::MemoryAuditSink;
pub use queue::AuditQueue;

/// Errors raised by audit sinks and the audit queue
#[derive(Error, Debug)]
pub enum AuditError {
    /// The sink cannot accept records right now
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A complete line of an audit file is not a record
    #[error("audit line {line} is not a valid record: {source}")]
    CorruptLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A record's hash does not follow from its predecessor
    #[error("audit chain broken at sequence {sequence}")]
    ChainBroken { sequence: u64 },
}

/// One appended audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the chain, starting at 1
    pub sequence: u64,

    pub recorded_at: DateTime<Utc>,

    pub decision: Decision,

    /// Sequence of an earlier record whose decision never reached its caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voids: Option<u64>,

    /// Hash of the preceding record, absent for the first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,

    /// SHA-256 hex over `prev_hash` and the record body
    pub hash: String,
}

#[derive(Serialize)]
struct RecordBody<'a> {
    sequence: u64,
    recorded_at: &'a DateTime<Utc>,
    decision: &'a Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    voids: Option<u64>,
}

fn compute_hash(
    sequence: u64,
    recorded_at: &DateTime<Utc>,
    decision: &Decision,
    voids: Option<u64>,
    prev_hash: Option<&str>,
) -> Result<String, AuditError> {
    let body = serde_json::to_vec(&RecordBody {
        sequence,
        recorded_at,
        decision,
        voids,
    })?;

    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

/// Tracks the head of a hash chain for the single writer
#[derive(Debug, Clone, Default)]
pub struct AuditChain {
    next_sequence: u64,
    head: Option<String>,
}

impl AuditChain {
    /// Continue after `tail`, or start a new chain
    pub fn resume(tail: Option<&AuditRecord>) -> Self {
        match tail {
            Some(record) => Self {
                next_sequence: record.sequence + 1,
                head: Some(record.hash.clone()),
            },
            None => Self {
                next_sequence: 1,
                head: None,
            },
        }
    }

    /// Build the next record without moving the head
    pub fn seal(&self, decision: Decision) -> Result<AuditRecord, AuditError> {
        self.seal_entry(decision, None)
    }

    /// Build the record that voids `voided`, whose caller timed out
    pub fn seal_void(&self, voided: &AuditRecord) -> Result<AuditRecord, AuditError> {
        let decision = voided.decision.clone().into_denied(DenialReason::Timeout);
        self.seal_entry(decision, Some(voided.sequence))
    }

    fn seal_entry(
        &self,
        decision: Decision,
        voids: Option<u64>,
    ) -> Result<AuditRecord, AuditError> {
        let recorded_at = Utc::now();
        let hash = compute_hash(
            self.next_sequence,
            &recorded_at,
            &decision,
            voids,
            self.head.as_deref(),
        )?;
        Ok(AuditRecord {
            sequence: self.next_sequence,
            recorded_at,
            decision,
            voids,
            prev_hash: self.head.clone(),
            hash,
        })
    }

    /// Move the head past a record the sink accepted
    pub fn advance(&mut self, record: &AuditRecord) {
        self.next_sequence = record.sequence + 1;
        self.head = Some(record.hash.clone());
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

/// Check that every record links to its predecessor and hashes correctly
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), AuditError> {
    let mut prev: Option<&AuditRecord> = None;
    for record in records {
        let linked = match prev {
            Some(p) => {
                record.sequence == p.sequence + 1 && record.prev_hash.as_deref() == Some(&p.hash)
            }
            None => true,
        };
        let expected = compute_hash(
            record.sequence,
            &record.recorded_at,
            &record.decision,
            record.voids,
            record.prev_hash.as_deref(),
        )?;
        if !linked || expected != record.hash {
            return Err(AuditError::ChainBroken {
                sequence: record.sequence,
            });
        }
        prev = Some(record);
    }
    Ok(())
}

/// Durable destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record; returns only once the record is durable
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Last record already held by the sink, used to resume the chain
    async fn tail(&self) -> Result<Option<AuditRecord>, AuditError> {
        Ok(None)
    }

    /// Short description for logs
    fn description(&self) -> &'static str;
}
