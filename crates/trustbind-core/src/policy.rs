//! Named capability policies referenced by bindings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::error::ValidationError;

/// One capability rule: a path in the secrets broker and what may be done there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRule {
    /// Path or path prefix (e.g. `secret/data/ci/*`)
    pub path: String,
    /// Capabilities on the path (e.g. `["read", "list"]`)
    pub capabilities: Vec<String>,
}

impl CapabilityRule {
    pub fn new(path: impl Into<String>, capabilities: &[&str]) -> Self {
        Self {
            path: path.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// A named, ordered list of capability rules
///
/// The core does not interpret rules; it only needs the name and that the
/// list is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<CapabilityRule>,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Append a rule
    pub fn with_rule(mut self, rule: CapabilityRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Store of named policies for one configuration load
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    policies: BTreeMap<String, Arc<Policy>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy
    pub fn insert(&mut self, policy: Policy) -> Result<(), ValidationError> {
        if policy.rules.is_empty() {
            return Err(ValidationError::EmptyPolicy(policy.name));
        }
        if self.policies.contains_key(&policy.name) {
            return Err(ValidationError::DuplicatePolicy(policy.name));
        }

        info!(policy = %policy.name, rules = policy.rules.len(), "Loaded policy");
        self.policies.insert(policy.name.clone(), Arc::new(policy));
        Ok(())
    }

    /// Get a policy by name
    pub fn get(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Policy names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.policies.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
