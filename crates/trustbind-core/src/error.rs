//! Error types for the trustbind core
//!
//! Load-time and compile-time failures are `Err` values that stop a
//! configuration from being served. Per-request evaluation failures are not
//! errors at all: they are recovered into a [`DenialReason`] inside a
//! `Denied` decision.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for compile operations
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors raised while registering issuers or policies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Discovery URL did not parse or used a disallowed scheme
    #[error("Malformed discovery URL for issuer '{issuer}': {reason}")]
    MalformedDiscoveryUrl { issuer: String, reason: String },

    /// Issuer accepts no audiences
    #[error("Issuer '{0}' declares no accepted audiences")]
    EmptyAudience(String),

    /// Issuer id or issuer URL registered twice in one load cycle
    #[error("Duplicate issuer: {0}")]
    DuplicateIssuer(String),

    /// Issuer URL (iss claim value) is empty
    #[error("Issuer '{0}' has an empty issuer URL")]
    EmptyIssuerUrl(String),

    /// Claim schema is unusable
    #[error("Invalid claim schema for issuer '{issuer}': {reason}")]
    InvalidClaimSchema { issuer: String, reason: String },

    /// Policy carries no capability rules
    #[error("Policy '{0}' has no capability rules")]
    EmptyPolicy(String),

    /// Policy name registered twice in one load
    #[error("Duplicate policy: {0}")]
    DuplicatePolicy(String),
}

/// Errors that abort a compile pass
///
/// A compile error is fatal to that pass only. Whatever snapshot was
/// published before keeps serving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Two bindings would share a key or an identical trust tuple
    #[error("Duplicate binding: {0}")]
    DuplicateBinding(String),

    /// token TTL exceeds max TTL
    #[error("Invalid TTL: token TTL {token_ttl}s exceeds max TTL {max_ttl}s")]
    InvalidTtl { token_ttl: u64, max_ttl: u64 },

    /// Referenced issuer is not registered
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// Referenced policy is not in the policy store
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// Template uses a placeholder other than {environment} / {operation}
    #[error("Unknown placeholder '{placeholder}' in template '{template}'")]
    UnknownPlaceholder { template: String, placeholder: String },

    /// Claim name not declared in the issuer's claim schema
    #[error("Claim '{claim}' is not declared by issuer '{issuer}'")]
    UnknownClaim { issuer: String, claim: String },

    /// Environment or operation domain is empty
    #[error("Empty {0} domain")]
    EmptyDomain(&'static str),

    /// Environment or operation name is unusable in a binding key
    #[error("Invalid {kind} name: '{name}'")]
    InvalidName { kind: &'static str, name: String },

    /// Bound audience is not accepted by the issuer
    #[error("Audience '{audience}' is not accepted by issuer '{issuer}'")]
    AudienceNotAccepted { issuer: String, audience: String },
}

/// Structured reason attached to a `Denied` decision
///
/// These are the only details a caller ever sees about a denial. They
/// never carry claim values.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    #[error("token expired")]
    Expired,

    #[error("issuer unknown")]
    IssuerUnknown,

    #[error("no binding accepts the token audience")]
    AudienceMismatch,

    #[error("bound claims did not match")]
    ClaimMismatch,

    #[error("subject did not match")]
    SubjectMismatch,

    #[error("more than one binding matched")]
    Ambiguous,

    #[error("evaluation deadline exceeded")]
    Timeout,

    #[error("audit trail unavailable")]
    AuditUnavailable,

    /// Raw token failed signature or format verification before evaluation
    #[error("token could not be verified")]
    Unverified,
}

impl DenialReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::Expired => "EXPIRED",
            DenialReason::IssuerUnknown => "ISSUER_UNKNOWN",
            DenialReason::AudienceMismatch => "AUDIENCE_MISMATCH",
            DenialReason::ClaimMismatch => "CLAIM_MISMATCH",
            DenialReason::SubjectMismatch => "SUBJECT_MISMATCH",
            DenialReason::Ambiguous => "AMBIGUOUS",
            DenialReason::Timeout => "TIMEOUT",
            DenialReason::AuditUnavailable => "AUDIT_UNAVAILABLE",
            DenialReason::Unverified => "UNVERIFIED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_reason_serializes_snake_case() {
        let json = serde_json::to_string(&DenialReason::SubjectMismatch).unwrap();
        assert_eq!(json, "\"subject_mismatch\"");
        assert_eq!(DenialReason::AuditUnavailable.code(), "AUDIT_UNAVAILABLE");
    }

    #[test]
    fn test_invalid_ttl_message() {
        let err = CompileError::InvalidTtl {
            token_ttl: 7200,
            max_ttl: 3600,
        };
        assert!(err.to_string().contains("7200"));
    }
}
