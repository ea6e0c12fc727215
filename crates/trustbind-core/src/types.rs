//! Common types used across trustbind

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name of a deployment environment (e.g. `dev`, `prod`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(pub String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Environment {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a pipeline operation (e.g. `plan`, `apply`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operation(pub String);

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Operation {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Declared type of a claim in an issuer's claim schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    String,
    Bool,
    Number,
    StringList,
}

impl ClaimType {
    /// Whether a JSON value conforms to this claim type
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ClaimType::String => value.is_string(),
            ClaimType::Bool => value.is_boolean(),
            ClaimType::Number => value.is_number(),
            ClaimType::StringList => value
                .as_array()
                .map(|items| items.iter().all(|v| v.is_string()))
                .unwrap_or(false),
        }
    }

    /// Whether a bound claim (exact string comparison) makes sense for this type
    pub fn is_scalar(&self) -> bool {
        !matches!(self, ClaimType::StringList)
    }
}

/// Render a scalar claim value as the string a bound claim compares against.
///
/// Lists, objects and null have no scalar rendering and never match.
pub fn claim_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A decoded identity token presented by a pipeline
///
/// Signature verification happens before a token reaches this type
/// (see the bridge crate); the evaluator trusts its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityToken {
    /// Issuer URL (`iss`)
    pub issuer: String,

    /// Subject (`sub`)
    pub subject: String,

    /// Audiences (`aud`)
    #[serde(default)]
    pub audience: BTreeSet<String>,

    /// All remaining claims
    #[serde(default)]
    pub claims: BTreeMap<String, serde_json::Value>,

    /// Expiry (`exp`)
    pub expiry: DateTime<Utc>,

    /// Issued at (`iat`)
    pub issued_at: DateTime<Utc>,
}

impl IdentityToken {
    /// Create a token issued now that expires in one hour
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            audience: BTreeSet::new(),
            claims: BTreeMap::new(),
            expiry: now + chrono::Duration::hours(1),
            issued_at: now,
        }
    }

    /// Add an audience
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience.insert(audience.into());
        self
    }

    /// Add a claim
    pub fn with_claim(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }

    /// Set the expiry
    pub fn expires_at(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Set the issued-at time
    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    /// Look up a claim by name, treating `sub` and `iss` as claims too
    pub fn claim(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "sub" => Some(serde_json::Value::String(self.subject.clone())),
            "iss" => Some(serde_json::Value::String(self.issuer.clone())),
            _ => self.claims.get(name).cloned(),
        }
    }

    /// Whether the token is expired at `now` (expiry is exclusive)
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}
