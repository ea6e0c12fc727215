//! Single-writer audit queue
//!
//! The queue owns the sink and the chain head inside one writer task fed by
//! a bounded channel. Submitters wait on a oneshot acknowledgement that
//! carries the appended record or the sink's error. If the acknowledgement
//! cannot be delivered because the submitter already gave up, the writer
//! appends a void record for it before taking the next submission.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use trustbind_core::Decision;

use super::{AuditChain, AuditError, AuditRecord, AuditSink};

struct Submission {
    decision: Decision,
    ack: oneshot::Sender<Result<AuditRecord, AuditError>>,
}

/// Handle to the audit writer task
#[derive(Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<Submission>,
}

impl AuditQueue {
    /// Resume the chain from the sink's tail and spawn the writer
    pub async fn start(sink: Arc<dyn AuditSink>, depth: usize) -> Result<Self, AuditError> {
        let tail = sink.tail().await?;
        let chain = AuditChain::resume(tail.as_ref());

        info!(
            sink = sink.description(),
            next_sequence = chain.next_sequence(),
            depth,
            "Starting audit writer"
        );

        let (tx, rx) = mpsc::channel(depth.max(1));
        tokio::spawn(run_writer(sink, chain, rx));

        Ok(Self { tx })
    }

    /// Append a decision; resolves once the record is durable
    pub async fn submit(&self, decision: Decision) -> Result<AuditRecord, AuditError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Submission { decision, ack })
            .await
            .map_err(|_| AuditError::Unavailable("audit queue closed".into()))?;
        done.await
            .map_err(|_| AuditError::Unavailable("audit writer stopped".into()))?
    }
}

async fn run_writer(
    sink: Arc<dyn AuditSink>,
    mut chain: AuditChain,
    mut rx: mpsc::Receiver<Submission>,
) {
    while let Some(Submission { decision, ack }) = rx.recv().await {
        // Submitter gave up (deadline); nothing is written for it
        if ack.is_closed() {
            debug!("Skipping audit write for abandoned submission");
            continue;
        }

        let sealed = chain.seal(decision);
        let record = match append(sink.as_ref(), &mut chain, sealed).await {
            Ok(record) => record,
            Err(e) => {
                let _ = ack.send(Err(e));
                continue;
            }
        };

        // The submitter stopped waiting while the record was being written
        if let Err(Ok(record)) = ack.send(Ok(record)) {
            void(sink.as_ref(), &mut chain, &record).await;
        }
    }
    debug!("Audit writer stopped");
}

async fn append(
    sink: &dyn AuditSink,
    chain: &mut AuditChain,
    sealed: Result<AuditRecord, AuditError>,
) -> Result<AuditRecord, AuditError> {
    let record = sealed?;
    if let Err(e) = sink.record(&record).await {
        error!(sink = sink.description(), error = %e, "Audit append failed");
        return Err(e);
    }
    chain.advance(&record);
    Ok(record)
}

/// Follow an undelivered record with a `Denied(Timeout)` record voiding it
async fn void(sink: &dyn AuditSink, chain: &mut AuditChain, undelivered: &AuditRecord) {
    let sealed = chain.seal_void(undelivered);
    match append(sink, chain, sealed).await {
        Ok(record) => warn!(
            voided = undelivered.sequence,
            sequence = record.sequence,
            "Audited decision never reached its caller; recorded as timed out"
        ),
        Err(e) => error!(
            voided = undelivered.sequence,
            error = %e,
            "SECURITY: could not void undelivered audit record"
        ),
    }
}
