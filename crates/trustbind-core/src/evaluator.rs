//! Claim evaluator
//!
//! Decides whether a decoded identity token is granted a binding from a
//! published [`BindingSet`]. Evaluation is fail-closed and short-circuits on
//! the first failing check:
//!
//! 1. expired token
//! 2. unknown issuer
//! 3. no binding accepts any of the token's audiences
//! 4. bound claims and exact subject comparison per candidate
//! 5. exactly one match grants; zero or several deny
//!
//! The evaluator is a pure function of the token, the snapshot and the
//! [`EvalContext`]. It never resolves ambiguity by picking a "best" match.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::binding::{Binding, BindingSet};
use crate::decision::{Decision, Verdict};
use crate::error::DenialReason;
use crate::types::{claim_as_string, IdentityToken};

/// Why an evaluation stopped before reaching a decision
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,

    #[error("evaluation cancelled")]
    Cancelled,
}

/// Inputs to an evaluation besides the token and snapshot
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Wall-clock time used for the expiry check and the decision timestamp
    pub now: DateTime<Utc>,
    /// Requested credential lifetime in seconds
    pub requested_ttl: Option<u64>,
    /// Monotonic deadline, checked between candidate comparisons
    pub deadline: Option<Instant>,
    /// Cancellation flag, checked between candidate comparisons
    pub cancel: Option<Arc<AtomicBool>>,
}

impl EvalContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            requested_ttl: None,
            deadline: None,
            cancel: None,
        }
    }

    /// Context at the current time with no deadline
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn with_requested_ttl(mut self, ttl: Option<u64>) -> Self {
        self.requested_ttl = ttl;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn checkpoint(&self) -> Result<(), Interrupted> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Acquire) {
                return Err(Interrupted::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Interrupted::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// Evaluates tokens against binding sets
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a token against a snapshot
    pub fn evaluate(
        &self,
        token: &IdentityToken,
        snapshot: &BindingSet,
        ctx: &EvalContext,
    ) -> Result<Decision, Interrupted> {
        ctx.checkpoint()?;

        let deny = |reason: DenialReason, claims: BTreeMap<String, serde_json::Value>| {
            debug!(issuer = %token.issuer, reason = %reason, "Token denied");
            Decision {
                verdict: Verdict::Denied { reason },
                revision: snapshot.revision(),
                issuer: token.issuer.clone(),
                subject: token.subject.clone(),
                claims,
                attributes: BTreeMap::new(),
                evaluated_at: ctx.now,
            }
        };

        // Step 1: expiry
        if token.is_expired_at(ctx.now) {
            return Ok(deny(DenialReason::Expired, BTreeMap::new()));
        }

        // Step 2: issuer
        let issuer = match snapshot.issuer(&token.issuer) {
            Some(issuer) => issuer,
            None => {
                warn!(issuer = %token.issuer, "SECURITY: token from unknown issuer");
                return Ok(deny(DenialReason::IssuerUnknown, BTreeMap::new()));
            }
        };

        // Step 3: audience
        let candidates: Vec<&Arc<Binding>> = snapshot
            .for_issuer(&token.issuer)
            .into_iter()
            .filter(|b| b.bound_audiences.iter().any(|a| token.audience.contains(a)))
            .collect();

        if candidates.is_empty() {
            return Ok(deny(DenialReason::AudienceMismatch, BTreeMap::new()));
        }

        // Step 4: claims and subject
        let mut considered = BTreeMap::new();
        considered.insert(
            "sub".to_string(),
            serde_json::Value::String(token.subject.clone()),
        );

        let mut matched: Vec<&Arc<Binding>> = Vec::new();
        let mut claims_matched_any = false;

        for binding in &candidates {
            ctx.checkpoint()?;

            let mut claims_ok = true;
            for (claim, expected) in &binding.bound_claims {
                let actual = token.claim(claim);
                // A value of the wrong declared type never matches, even if
                // it renders to the expected string
                let rendered = actual
                    .as_ref()
                    .filter(|value| {
                        issuer
                            .claim_schema
                            .claim_type(claim)
                            .map_or(true, |claim_type| claim_type.accepts(value))
                    })
                    .and_then(claim_as_string);
                if let Some(value) = actual {
                    considered.insert(claim.clone(), value);
                }
                if rendered.as_deref() != Some(expected.as_str()) {
                    claims_ok = false;
                    break;
                }
            }
            if !claims_ok {
                continue;
            }
            claims_matched_any = true;

            if token.subject == binding.subject {
                matched.push(binding);
            }
        }

        // Steps 5-7: exactly one match grants
        match matched.as_slice() {
            [binding] => {
                let attributes = mapped_attributes(token, binding);
                for claim in binding.claim_mappings.keys() {
                    if let Some(value) = token.claim(claim) {
                        considered.insert(claim.clone(), value);
                    }
                }
                let effective_ttl = binding.effective_ttl(ctx.requested_ttl);

                debug!(
                    binding = %binding.key,
                    policy = %binding.policy,
                    effective_ttl,
                    "Token granted"
                );

                Ok(Decision {
                    verdict: Verdict::Granted {
                        binding: binding.key.clone(),
                        policy: binding.policy.clone(),
                        effective_ttl,
                    },
                    revision: snapshot.revision(),
                    issuer: token.issuer.clone(),
                    subject: token.subject.clone(),
                    claims: considered,
                    attributes,
                    evaluated_at: ctx.now,
                })
            }
            [] if claims_matched_any => Ok(deny(DenialReason::SubjectMismatch, considered)),
            [] => Ok(deny(DenialReason::ClaimMismatch, considered)),
            many => {
                warn!(
                    issuer = %token.issuer,
                    bindings = ?many.iter().map(|b| b.key.as_str()).collect::<Vec<_>>(),
                    "SECURITY: token matched more than one binding"
                );
                Ok(deny(DenialReason::Ambiguous, considered))
            }
        }
    }
}

fn mapped_attributes(
    token: &IdentityToken,
    binding: &Binding,
) -> BTreeMap<String, serde_json::Value> {
    binding
        .claim_mappings
        .iter()
        .filter_map(|(claim, attribute)| token.claim(claim).map(|v| (attribute.clone(), v)))
        .collect()
}
