//! Deadline-bounded evaluation gateway
//!
//! The gateway ties the published snapshot, the evaluator, the audit queue
//! and the token bridge together. Every decision it returns has been
//! appended to the audit trail first; if the append fails the caller gets
//! `Denied(AuditUnavailable)` instead.
//!
//! Each call is bounded by a deadline covering token verification,
//! evaluation and the audit append. A call that runs out of time sets the
//! evaluation's cancel flag and returns `Denied(Timeout)`, which is logged
//! but not audited. If its decision was already being written when the
//! deadline hit, the audit writer follows it with a record voiding it, so
//! the trail never shows a grant the caller did not receive.

use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use trustbind_bridge::{BridgeError, TokenBridge, TokenFormat};
use trustbind_core::{
    BindingSet, Decision, DenialReason, EvalContext, Evaluator, IdentityToken, Interrupted,
    Verdict,
};

use crate::audit::{AuditQueue, AuditSink};
use crate::config::TrustbindConfig;
use crate::error::Result;
use crate::snapshot::SnapshotHandle;
use crate::storage::{PersistedSnapshot, SnapshotStore};

pub struct Gateway {
    snapshot: SnapshotHandle,
    audit: AuditQueue,
    store: Arc<dyn SnapshotStore>,
    bridge: TokenBridge,
    evaluator: Evaluator,
    /// Serializes reloads; evaluations never take it
    reload_lock: Mutex<()>,
}

impl Gateway {
    pub fn new(
        initial: BindingSet,
        audit: AuditQueue,
        store: Arc<dyn SnapshotStore>,
        bridge: TokenBridge,
    ) -> Self {
        Self {
            snapshot: SnapshotHandle::new(initial),
            audit,
            store,
            bridge,
            evaluator: Evaluator::new(),
            reload_lock: Mutex::new(()),
        }
    }

    /// Compile the initial snapshot, start the audit writer and build a gateway
    pub async fn start(
        config: &TrustbindConfig,
        sink: Arc<dyn AuditSink>,
        store: Arc<dyn SnapshotStore>,
        bridge: TokenBridge,
    ) -> Result<Self> {
        let initial = initial_snapshot(config, store.as_ref()).await?;
        let audit = AuditQueue::start(sink, config.audit.queue_depth).await?;
        Ok(Self::new(initial, audit, store, bridge))
    }

    /// The currently published binding set
    pub fn snapshot(&self) -> Arc<BindingSet> {
        self.snapshot.current()
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.revision()
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate a decoded token against the current snapshot
    pub async fn evaluate(
        &self,
        token: &IdentityToken,
        deadline: Duration,
        requested_ttl: Option<u64>,
    ) -> Decision {
        let snapshot = self.snapshot.current();
        let cancel = Arc::new(AtomicBool::new(false));
        let result = self
            .evaluate_cancellable(token, &snapshot, deadline, requested_ttl, cancel)
            .await;
        self.settle(result, &snapshot, &token.issuer, &token.subject)
    }

    /// Evaluate a decoded token against a given snapshot with a caller-held
    /// cancel flag
    ///
    /// Setting the flag aborts claim comparison at the next candidate; no
    /// audit record is written for an interrupted evaluation.
    pub async fn evaluate_cancellable(
        &self,
        token: &IdentityToken,
        snapshot: &BindingSet,
        deadline: Duration,
        requested_ttl: Option<u64>,
        cancel: Arc<AtomicBool>,
    ) -> std::result::Result<Decision, Interrupted> {
        let ctx = context(deadline, requested_ttl, cancel.clone());
        let work = async {
            let decision = self.evaluator.evaluate(token, snapshot, &ctx)?;
            Ok::<_, Interrupted>(self.record(decision).await)
        };
        bounded(work, deadline, &cancel).await
    }

    /// Verify a raw JWT through the bridge, then evaluate it
    ///
    /// Tokens from an issuer outside the snapshot are `Denied(IssuerUnknown)`;
    /// any other verification failure is `Denied(Unverified)`. Both are
    /// audited.
    pub async fn evaluate_raw(
        &self,
        raw: &str,
        deadline: Duration,
        requested_ttl: Option<u64>,
    ) -> Decision {
        let snapshot = self.snapshot.current();
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = context(deadline, requested_ttl, cancel.clone());

        let work = async {
            let token = match self.bridge.decode(raw, TokenFormat::Jwt, &snapshot).await {
                Ok(token) => token,
                Err(e) => {
                    let decision = unverified_decision(&e, &snapshot);
                    return Ok::<_, Interrupted>(self.record(decision).await);
                }
            };
            let decision = self.evaluator.evaluate(&token, &snapshot, &ctx)?;
            Ok::<_, Interrupted>(self.record(decision).await)
        };

        let result = bounded(work, deadline, &cancel).await;
        self.settle(result, &snapshot, "", "")
    }

    /// Append to the audit trail; a failed append turns the decision into a denial
    async fn record(&self, decision: Decision) -> Decision {
        match self.audit.submit(decision.clone()).await {
            Ok(record) => {
                match &decision.verdict {
                    Verdict::Granted {
                        binding,
                        effective_ttl,
                        ..
                    } => info!(
                        binding = %binding,
                        issuer = %decision.issuer,
                        revision = decision.revision,
                        effective_ttl,
                        sequence = record.sequence,
                        "Token granted"
                    ),
                    Verdict::Denied { reason } => info!(
                        reason = %reason,
                        issuer = %decision.issuer,
                        revision = decision.revision,
                        sequence = record.sequence,
                        "Token denied"
                    ),
                }
                decision
            }
            Err(e) => {
                warn!(
                    error = %e,
                    issuer = %decision.issuer,
                    "SECURITY: audit append failed; denying"
                );
                decision.into_denied(DenialReason::AuditUnavailable)
            }
        }
    }

    fn settle(
        &self,
        result: std::result::Result<Decision, Interrupted>,
        snapshot: &BindingSet,
        issuer: &str,
        subject: &str,
    ) -> Decision {
        match result {
            Ok(decision) => decision,
            Err(interrupted) => {
                warn!(
                    revision = snapshot.revision(),
                    issuer = %issuer,
                    cause = %interrupted,
                    "Evaluation interrupted"
                );
                Decision::denied_without_context(
                    DenialReason::Timeout,
                    snapshot.revision(),
                    issuer,
                    subject,
                    Utc::now(),
                )
            }
        }
    }

    // =========================================================================
    // Reload
    // =========================================================================

    /// Recompile from `config`, persist and publish
    ///
    /// On any failure the current snapshot keeps serving.
    pub async fn reload(&self, config: &TrustbindConfig) -> Result<Arc<BindingSet>> {
        let _guard = self.reload_lock.lock().await;
        let current = self.snapshot.current();

        let result = self.compile_and_publish(config, &current).await;

        if let Err(e) = &result {
            warn!(
                revision = current.revision(),
                error = %e,
                "Reload failed; previous binding set keeps serving"
            );
        }
        result
    }

    async fn compile_and_publish(
        &self,
        config: &TrustbindConfig,
        current: &BindingSet,
    ) -> Result<Arc<BindingSet>> {
        let next = config.domain()?.compile(current)?;
        let drift = current.diff(&next);
        debug!(
            added = drift.added.len(),
            removed = drift.removed.len(),
            changed = drift.changed.len(),
            "Reload drift"
        );
        self.store.save(&PersistedSnapshot::from_set(&next)).await?;
        let published = self.snapshot.publish(next)?;

        // Trust anchors or discovery URLs may have changed
        self.bridge.invalidate_caches();
        Ok(published)
    }
}

fn context(deadline: Duration, requested_ttl: Option<u64>, cancel: Arc<AtomicBool>) -> EvalContext {
    EvalContext::now()
        .with_requested_ttl(requested_ttl)
        .with_deadline(Instant::now() + deadline)
        .with_cancel(cancel)
}

async fn bounded<F>(
    work: F,
    deadline: Duration,
    cancel: &AtomicBool,
) -> std::result::Result<Decision, Interrupted>
where
    F: Future<Output = std::result::Result<Decision, Interrupted>>,
{
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => {
            cancel.store(true, Ordering::Release);
            Err(Interrupted::DeadlineExceeded)
        }
    }
}

fn unverified_decision(error: &BridgeError, snapshot: &BindingSet) -> Decision {
    let (reason, issuer) = match error {
        BridgeError::UnknownIssuer(iss) => (DenialReason::IssuerUnknown, iss.as_str()),
        _ => (DenialReason::Unverified, ""),
    };
    warn!(
        reason = %reason,
        error = %error,
        "SECURITY: presented token failed verification"
    );
    Decision::denied_without_context(reason, snapshot.revision(), issuer, "", Utc::now())
}

/// Compile the snapshot to serve at startup
///
/// The revision continues from the persisted snapshot, if any, and drift
/// against it is logged before the new set is saved.
pub async fn initial_snapshot(
    config: &TrustbindConfig,
    store: &dyn SnapshotStore,
) -> Result<BindingSet> {
    let domain = config.domain()?;
    let persisted = store.load().await?;
    let revision = persisted.as_ref().map_or(1, |p| p.revision + 1);
    let set = domain.compile_at(revision)?;

    if let Some(previous) = &persisted {
        let drift = previous.diff(&set);
        if drift.is_empty() {
            info!(
                persisted = previous.revision,
                revision, "Compiled bindings match persisted snapshot"
            );
        } else {
            warn!(
                persisted = previous.revision,
                revision,
                added = ?drift.added,
                removed = ?drift.removed,
                changed = ?drift.changed,
                "Compiled bindings drift from persisted snapshot"
            );
        }
    }

    store.save(&PersistedSnapshot::from_set(&set)).await?;
    info!(
        revision,
        bindings = set.len(),
        store = store.description(),
        "Initial binding set compiled"
    );
    Ok(set)
}
