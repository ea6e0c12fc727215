//! Trusted issuer registry
//!
//! Holds validated issuer configurations keyed by issuer URL (the `iss`
//! claim value). Registration is validated up front so that a malformed
//! issuer never reaches the compiler.
//!
//! Registrations are grouped into load cycles. Within one cycle an issuer
//! id (or issuer URL) may be registered only once; a later cycle may
//! re-register the same id, which replaces the previous entry atomically.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ValidationError;
use crate::types::ClaimType;

/// Claims every identity token carries regardless of issuer
pub const STANDARD_CLAIMS: &[(&str, ClaimType)] = &[
    ("sub", ClaimType::String),
    ("iss", ClaimType::String),
    ("aud", ClaimType::StringList),
    ("exp", ClaimType::Number),
    ("iat", ClaimType::Number),
];

/// Public signing key published by an issuer (RFC 7517 subset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Key type (`RSA` or `EC`)
    pub kty: String,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Use (`sig` for signing)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Where signing keys for an issuer come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrustAnchor {
    /// A key pinned in configuration
    Jwk(Jwk),
    /// A JWKS document fetched over HTTPS
    JwksUri { url: String },
}

/// Typed claim schema for an issuer
///
/// Lists the platform-specific claims the issuer emits. The standard
/// claims in [`STANDARD_CLAIMS`] are always implied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSchema {
    pub claims: BTreeMap<String, ClaimType>,
}

impl ClaimSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a claim
    pub fn with_claim(mut self, name: impl Into<String>, claim_type: ClaimType) -> Self {
        self.claims.insert(name.into(), claim_type);
        self
    }

    /// Type of a claim, including standard claims
    pub fn claim_type(&self, name: &str) -> Option<ClaimType> {
        STANDARD_CLAIMS
            .iter()
            .find(|(standard, _)| *standard == name)
            .map(|(_, t)| *t)
            .or_else(|| self.claims.get(name).copied())
    }

    /// Whether a claim name is known for this issuer
    pub fn declares(&self, name: &str) -> bool {
        self.claim_type(name).is_some()
    }
}

/// A trusted identity token issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// Registry identifier (e.g. `github-actions`)
    pub id: String,

    /// OIDC discovery document URL
    pub discovery_url: String,

    /// Value of the `iss` claim in tokens from this issuer
    pub issuer_url: String,

    /// Audiences this issuer's tokens may carry
    pub audiences: BTreeSet<String>,

    /// Signing-key trust anchors
    #[serde(default)]
    pub trust_anchors: Vec<TrustAnchor>,

    /// Platform-specific claim schema
    #[serde(default)]
    pub claim_schema: ClaimSchema,
}

impl Issuer {
    /// Create an issuer with no audiences, anchors or extra claims
    pub fn new(
        id: impl Into<String>,
        issuer_url: impl Into<String>,
        discovery_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            discovery_url: discovery_url.into(),
            issuer_url: issuer_url.into(),
            audiences: BTreeSet::new(),
            trust_anchors: Vec::new(),
            claim_schema: ClaimSchema::new(),
        }
    }

    /// Accept an audience
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.insert(audience.into());
        self
    }

    /// Add a trust anchor
    pub fn with_trust_anchor(mut self, anchor: TrustAnchor) -> Self {
        self.trust_anchors.push(anchor);
        self
    }

    /// Set the claim schema
    pub fn with_claim_schema(mut self, schema: ClaimSchema) -> Self {
        self.claim_schema = schema;
        self
    }

    /// Validate everything that can be checked without the network
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_discovery_url(&self.id, &self.discovery_url)?;

        if self.issuer_url.trim().is_empty() {
            return Err(ValidationError::EmptyIssuerUrl(self.id.clone()));
        }

        if self.audiences.is_empty() || self.audiences.iter().any(|a| a.trim().is_empty()) {
            return Err(ValidationError::EmptyAudience(self.id.clone()));
        }

        for (name, declared) in &self.claim_schema.claims {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(ValidationError::InvalidClaimSchema {
                    issuer: self.id.clone(),
                    reason: format!("claim name '{}' is not a valid identifier", name),
                });
            }
            if let Some((_, standard)) = STANDARD_CLAIMS.iter().find(|(s, _)| s == name) {
                if standard != declared {
                    return Err(ValidationError::InvalidClaimSchema {
                        issuer: self.id.clone(),
                        reason: format!("standard claim '{}' redeclared with another type", name),
                    });
                }
            }
        }

        Ok(())
    }
}

fn validate_discovery_url(issuer: &str, raw: &str) -> Result<(), ValidationError> {
    let malformed = |reason: String| ValidationError::MalformedDiscoveryUrl {
        issuer: issuer.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| malformed(e.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| malformed("missing host".into()))?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback(host) => {}
        scheme => return Err(malformed(format!("scheme '{}' is not allowed", scheme))),
    }

    if url.fragment().is_some() {
        return Err(malformed("fragment is not allowed".into()));
    }

    Ok(())
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<String, Arc<Issuer>>,
    by_url: HashMap<String, String>,
    cycle: u64,
    cycle_ids: HashSet<String>,
    cycle_urls: HashSet<String>,
}

/// Registry of trusted issuers
pub struct IssuerRegistry {
    state: RwLock<RegistryState>,
}

impl IssuerRegistry {
    /// Create an empty registry in load cycle 0
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Start a new load cycle
    ///
    /// Issuers registered in earlier cycles stay visible until replaced.
    pub fn begin_cycle(&self) -> u64 {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.cycle += 1;
        state.cycle_ids.clear();
        state.cycle_urls.clear();
        debug!(cycle = state.cycle, "Started issuer load cycle");
        state.cycle
    }

    /// Register an issuer
    ///
    /// Fails without registering anything if the issuer is invalid or its
    /// id or issuer URL was already registered in the current cycle.
    pub fn register(&self, issuer: Issuer) -> Result<(), ValidationError> {
        issuer.validate()?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        if state.cycle_ids.contains(&issuer.id) {
            warn!(issuer = %issuer.id, "Rejected duplicate issuer id");
            return Err(ValidationError::DuplicateIssuer(issuer.id));
        }
        if state.cycle_urls.contains(&issuer.issuer_url) {
            warn!(issuer = %issuer.id, issuer_url = %issuer.issuer_url, "Rejected duplicate issuer URL");
            return Err(ValidationError::DuplicateIssuer(issuer.issuer_url));
        }
        // An earlier cycle may have bound this URL to a different id
        if let Some(owner) = state.by_url.get(&issuer.issuer_url) {
            if owner != &issuer.id {
                let owner = owner.clone();
                state.by_id.remove(&owner);
            }
        }

        if let Some(previous) = state.by_id.get(&issuer.id) {
            if previous.issuer_url != issuer.issuer_url {
                let stale = previous.issuer_url.clone();
                state.by_url.remove(&stale);
            }
        }

        info!(
            issuer = %issuer.id,
            issuer_url = %issuer.issuer_url,
            audiences = issuer.audiences.len(),
            anchors = issuer.trust_anchors.len(),
            "Registered issuer"
        );

        state.cycle_ids.insert(issuer.id.clone());
        state.cycle_urls.insert(issuer.issuer_url.clone());
        state.by_url.insert(issuer.issuer_url.clone(), issuer.id.clone());
        state.by_id.insert(issuer.id.clone(), Arc::new(issuer));
        Ok(())
    }

    /// Look up an issuer by issuer URL
    pub fn lookup(&self, issuer_url: &str) -> Option<Arc<Issuer>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .by_url
            .get(issuer_url)
            .and_then(|id| state.by_id.get(id))
            .cloned()
    }

    /// Look up an issuer by registry id
    pub fn get(&self, id: &str) -> Option<Arc<Issuer>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.by_id.get(id).cloned()
    }

    /// Resolve a reference that may be either an id or an issuer URL
    pub fn resolve(&self, reference: &str) -> Option<Arc<Issuer>> {
        self.get(reference).or_else(|| self.lookup(reference))
    }

    /// All registered issuers, sorted by id
    pub fn issuers(&self) -> Vec<Arc<Issuer>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut issuers: Vec<_> = state.by_id.values().cloned().collect();
        issuers.sort_by(|a, b| a.id.cmp(&b.id));
        issuers
    }

    /// Number of registered issuers
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IssuerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
