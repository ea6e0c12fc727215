//! Compiled bindings and the immutable binding set
//!
//! A [`BindingSet`] is only ever produced by the compiler. Once built it
//! exposes read-only accessors; publishing a new configuration means
//! building a new set.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::issuer::Issuer;
use crate::types::{Environment, Operation};

/// A compiled binding ("role")
///
/// Serializes to the binding record format used for persistence and for
/// diffing two compiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Binding key (`{operation}-{environment}`, optionally prefixed)
    pub key: String,
    pub environment: Environment,
    pub operation: Operation,
    /// Registry id of the issuer
    pub issuer_id: String,
    /// Issuer URL tokens must carry in `iss`
    pub issuer: String,
    /// Exact subject a token must present
    pub subject: String,
    /// Audiences a token must intersect
    pub bound_audiences: BTreeSet<String>,
    /// Claims that must equal these values exactly
    #[serde(default)]
    pub bound_claims: BTreeMap<String, String>,
    /// Token claim name -> internal attribute name, for audit
    #[serde(default)]
    pub claim_mappings: BTreeMap<String, String>,
    /// Default credential lifetime in seconds
    pub token_ttl: u64,
    /// Upper bound on credential lifetime in seconds
    pub max_ttl: u64,
    /// Name of the capability policy granted
    pub policy: String,
}

/// The parts of a binding that decide which tokens it accepts
pub type TrustTuple = (String, BTreeSet<String>, BTreeMap<String, String>, String);

impl Binding {
    /// (issuer, bound audiences, bound claims, subject)
    pub fn trust_tuple(&self) -> TrustTuple {
        (
            self.issuer.clone(),
            self.bound_audiences.clone(),
            self.bound_claims.clone(),
            self.subject.clone(),
        )
    }

    /// Effective TTL for a request, capped by both TTL bounds
    pub fn effective_ttl(&self, requested: Option<u64>) -> u64 {
        let bound = self.token_ttl.min(self.max_ttl);
        match requested {
            Some(requested) => requested.min(bound),
            None => bound,
        }
    }
}

/// An immutable, versioned collection of bindings
#[derive(Debug, Clone)]
pub struct BindingSet {
    revision: u64,
    bindings: BTreeMap<String, Arc<Binding>>,
    issuers: BTreeMap<String, Arc<Issuer>>,
    by_issuer: BTreeMap<String, Vec<String>>,
    by_scope: BTreeMap<(Environment, Operation), Vec<String>>,
}

impl BindingSet {
    /// The empty set at revision 0, served before the first compile
    pub fn empty() -> Self {
        Self::from_parts(0, BTreeMap::new(), BTreeMap::new())
    }

    pub(crate) fn from_parts(
        revision: u64,
        bindings: BTreeMap<String, Arc<Binding>>,
        issuers: BTreeMap<String, Arc<Issuer>>,
    ) -> Self {
        let mut by_issuer: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut by_scope: BTreeMap<(Environment, Operation), Vec<String>> = BTreeMap::new();

        for (key, binding) in &bindings {
            by_issuer
                .entry(binding.issuer.clone())
                .or_default()
                .push(key.clone());
            by_scope
                .entry((binding.environment.clone(), binding.operation.clone()))
                .or_default()
                .push(key.clone());
        }

        Self {
            revision,
            bindings,
            issuers,
            by_issuer,
            by_scope,
        }
    }

    /// Monotonically increasing revision number
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binding by key
    pub fn get(&self, key: &str) -> Option<&Arc<Binding>> {
        self.bindings.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    /// Bindings in key order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.bindings.values()
    }

    /// Issuer captured at compile time, by issuer URL
    pub fn issuer(&self, issuer_url: &str) -> Option<&Arc<Issuer>> {
        self.issuers.get(issuer_url)
    }

    /// Issuers referenced by this set
    pub fn issuers(&self) -> impl Iterator<Item = &Arc<Issuer>> {
        self.issuers.values()
    }

    /// Bindings for an issuer URL, in key order
    pub fn for_issuer(&self, issuer_url: &str) -> Vec<&Arc<Binding>> {
        self.by_issuer
            .get(issuer_url)
            .map(|keys| keys.iter().filter_map(|k| self.bindings.get(k)).collect())
            .unwrap_or_default()
    }

    /// Bindings for an (environment, operation) pair across all issuers
    pub fn for_scope(&self, environment: &Environment, operation: &Operation) -> Vec<&Arc<Binding>> {
        self.by_scope
            .get(&(environment.clone(), operation.clone()))
            .map(|keys| keys.iter().filter_map(|k| self.bindings.get(k)).collect())
            .unwrap_or_default()
    }

    /// Ordered binding records with all resolved fields
    pub fn records(&self) -> Vec<Binding> {
        self.bindings.values().map(|b| b.as_ref().clone()).collect()
    }

    /// SHA-256 over the canonical records; the revision is excluded
    pub fn digest(&self) -> String {
        records_digest(&self.records())
    }

    /// Changes needed to go from `self` to `next`
    pub fn diff(&self, next: &BindingSet) -> BindingSetDiff {
        BindingSetDiff::between(&self.records(), &next.records())
    }
}

/// SHA-256 hex digest of an ordered record list
pub fn records_digest(records: &[Binding]) -> String {
    let bytes = serde_json::to_vec(records).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Drift between two compiled record lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl BindingSetDiff {
    /// Compare two record lists by key
    pub fn between(old: &[Binding], new: &[Binding]) -> Self {
        let old: BTreeMap<&str, &Binding> = old.iter().map(|b| (b.key.as_str(), b)).collect();
        let new: BTreeMap<&str, &Binding> = new.iter().map(|b| (b.key.as_str(), b)).collect();

        let mut diff = Self::default();
        for (key, binding) in &new {
            match old.get(key) {
                None => diff.added.push(key.to_string()),
                Some(previous) if previous != binding => diff.changed.push(key.to_string()),
                Some(_) => {}
            }
        }
        for key in old.keys() {
            if !new.contains_key(key) {
                diff.removed.push(key.to_string());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(key: &str, subject: &str) -> Binding {
        Binding {
            key: key.into(),
            environment: Environment::new("dev"),
            operation: Operation::new("plan"),
            issuer_id: "github-actions".into(),
            issuer: "https://token.actions.githubusercontent.com".into(),
            subject: subject.into(),
            bound_audiences: ["https://vault.example.com".to_string()].into(),
            bound_claims: BTreeMap::new(),
            claim_mappings: BTreeMap::new(),
            token_ttl: 900,
            max_ttl: 3600,
            policy: "terraform-plan".into(),
        }
    }

    #[test]
    fn test_effective_ttl() {
        let b = binding("plan-dev", "s");
        assert_eq!(b.effective_ttl(None), 900);
        assert_eq!(b.effective_ttl(Some(60)), 60);
        assert_eq!(b.effective_ttl(Some(86_400)), 900);
    }

    #[test]
    fn test_diff_detects_changes() {
        let old = vec![binding("plan-dev", "a"), binding("plan-prod", "b")];
        let new = vec![binding("plan-dev", "a2"), binding("apply-dev", "c")];

        let diff = BindingSetDiff::between(&old, &new);
        assert_eq!(diff.added, vec!["apply-dev"]);
        assert_eq!(diff.removed, vec!["plan-prod"]);
        assert_eq!(diff.changed, vec!["plan-dev"]);
        assert!(!diff.is_empty());
        assert!(BindingSetDiff::between(&old, &old).is_empty());
    }

    #[test]
    fn test_digest_stable_and_content_sensitive() {
        let a = vec![binding("plan-dev", "a")];
        let b = vec![binding("plan-dev", "b")];
        assert_eq!(records_digest(&a), records_digest(&a.clone()));
        assert_ne!(records_digest(&a), records_digest(&b));
    }

    #[test]
    fn test_empty_set() {
        let set = BindingSet::empty();
        assert_eq!(set.revision(), 0);
        assert!(set.is_empty());
        assert!(set.for_issuer("https://any").is_empty());
    }
}
