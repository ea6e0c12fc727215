//! Evaluation outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::DenialReason;

/// The verdict part of a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    Granted {
        /// Key of the matched binding
        binding: String,
        /// Policy to attach to the issued credential
        policy: String,
        /// Credential lifetime in seconds
        effective_ttl: u64,
    },
    Denied {
        reason: DenialReason,
    },
}

/// A complete evaluation result, as recorded in the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,

    /// Revision of the binding set the token was evaluated against
    pub revision: u64,

    /// `iss` of the presented token
    pub issuer: String,

    /// `sub` of the presented token
    pub subject: String,

    /// Token claims that took part in the comparison
    #[serde(default)]
    pub claims: BTreeMap<String, serde_json::Value>,

    /// Internal attributes derived through the binding's claim mappings
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self.verdict, Verdict::Granted { .. })
    }

    /// Denial reason, if denied
    pub fn reason(&self) -> Option<DenialReason> {
        match self.verdict {
            Verdict::Denied { reason } => Some(reason),
            Verdict::Granted { .. } => None,
        }
    }

    /// Replace the verdict with a denial, keeping the recorded context
    pub fn into_denied(mut self, reason: DenialReason) -> Self {
        self.verdict = Verdict::Denied { reason };
        self.attributes.clear();
        self
    }

    /// A denial with no claim context (used when evaluation never completed)
    pub fn denied_without_context(
        reason: DenialReason,
        revision: u64,
        issuer: impl Into<String>,
        subject: impl Into<String>,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            verdict: Verdict::Denied { reason },
            revision,
            issuer: issuer.into(),
            subject: subject.into(),
            claims: BTreeMap::new(),
            attributes: BTreeMap::new(),
            evaluated_at,
        }
    }
}
