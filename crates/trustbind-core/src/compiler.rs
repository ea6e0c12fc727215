//! Binding compiler
//!
//! Expands binding groups (an issuer, a subject template and the declared
//! environment × operation domain) into concrete bindings. Generation is an
//! explicit loop over lexicographically sorted domains, so the same input
//! always yields the same records.
//!
//! A compile pass is a consuming builder: each [`CompilePass::compile`] call
//! either returns the extended pass or an error, and an error drops the
//! pass. There is no way to obtain a partially compiled [`BindingSet`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::binding::{Binding, BindingSet, TrustTuple};
use crate::error::{CompileError, Result};
use crate::issuer::{Issuer, IssuerRegistry};
use crate::policy::PolicyStore;
use crate::types::{Environment, Operation};

/// Placeholder replaced by the environment name
pub const ENVIRONMENT_PLACEHOLDER: &str = "environment";
/// Placeholder replaced by the operation name
pub const OPERATION_PLACEHOLDER: &str = "operation";

/// One compile request: a trusted issuer over an environment × operation domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingGroup {
    /// Issuer id or issuer URL
    pub issuer: String,

    /// Declared environments
    pub environments: Vec<Environment>,

    /// Declared operations
    pub operations: Vec<Operation>,

    /// Subject template, e.g. `repo:org/repo:environment:tf-{operation}-{environment}`
    pub subject_template: String,

    /// Audiences to bind; defaults to everything the issuer accepts
    #[serde(default)]
    pub bound_audiences: Option<BTreeSet<String>>,

    /// Claims that must match exactly; values may use placeholders
    #[serde(default)]
    pub bound_claims: BTreeMap<String, String>,

    /// Claim name -> internal attribute name, recorded in audit
    #[serde(default)]
    pub claim_mappings: BTreeMap<String, String>,

    /// Policy granted by every binding in the group
    pub policy: String,

    /// Default credential lifetime in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,

    /// Upper bound on credential lifetime in seconds
    #[serde(default = "default_max_ttl")]
    pub max_ttl: u64,

    /// Prefix for binding keys (`{prefix}-{operation}-{environment}`)
    #[serde(default)]
    pub key_prefix: Option<String>,
}

fn default_token_ttl() -> u64 {
    900
}

fn default_max_ttl() -> u64 {
    3600
}

impl BindingGroup {
    pub fn new(
        issuer: impl Into<String>,
        subject_template: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            environments: Vec::new(),
            operations: Vec::new(),
            subject_template: subject_template.into(),
            bound_audiences: None,
            bound_claims: BTreeMap::new(),
            claim_mappings: BTreeMap::new(),
            policy: policy.into(),
            token_ttl: default_token_ttl(),
            max_ttl: default_max_ttl(),
            key_prefix: None,
        }
    }

    pub fn environments(mut self, environments: &[&str]) -> Self {
        self.environments = environments.iter().map(|e| Environment::new(*e)).collect();
        self
    }

    pub fn operations(mut self, operations: &[&str]) -> Self {
        self.operations = operations.iter().map(|o| Operation::new(*o)).collect();
        self
    }

    pub fn ttl(mut self, token_ttl: u64, max_ttl: u64) -> Self {
        self.token_ttl = token_ttl;
        self.max_ttl = max_ttl;
        self
    }

    pub fn bound_claim(mut self, claim: impl Into<String>, value: impl Into<String>) -> Self {
        self.bound_claims.insert(claim.into(), value.into());
        self
    }

    pub fn claim_mapping(mut self, claim: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.claim_mappings.insert(claim.into(), attribute.into());
        self
    }

    pub fn bound_audiences(mut self, audiences: &[&str]) -> Self {
        self.bound_audiences = Some(audiences.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Interpolate `{environment}` and `{operation}` in a template.
///
/// Any other placeholder, or an unterminated `{`, is a compile error.
pub fn interpolate(template: &str, environment: &str, operation: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| CompileError::UnknownPlaceholder {
            template: template.to_string(),
            placeholder: after.to_string(),
        })?;

        match &after[..close] {
            ENVIRONMENT_PLACEHOLDER => out.push_str(environment),
            OPERATION_PLACEHOLDER => out.push_str(operation),
            other => {
                return Err(CompileError::UnknownPlaceholder {
                    template: template.to_string(),
                    placeholder: other.to_string(),
                })
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

fn validate_name(kind: &'static str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CompileError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// Compiles binding groups against an issuer registry and policy store
#[derive(Clone, Copy)]
pub struct BindingCompiler<'a> {
    issuers: &'a IssuerRegistry,
    policies: &'a PolicyStore,
}

impl<'a> BindingCompiler<'a> {
    pub fn new(issuers: &'a IssuerRegistry, policies: &'a PolicyStore) -> Self {
        Self { issuers, policies }
    }

    /// Start a pass whose result supersedes `previous`
    pub fn begin(&self, previous: &BindingSet) -> CompilePass<'a> {
        self.begin_at(previous.revision() + 1)
    }

    /// Start a pass that will produce the given revision
    pub fn begin_at(&self, revision: u64) -> CompilePass<'a> {
        CompilePass {
            compiler: *self,
            revision,
            bindings: BTreeMap::new(),
            tuples: HashMap::new(),
            issuers: BTreeMap::new(),
        }
    }

    /// Compile every group into one set superseding `previous`
    pub fn compile_all(&self, previous: &BindingSet, groups: &[BindingGroup]) -> Result<BindingSet> {
        let mut pass = self.begin(previous);
        for group in groups {
            pass = pass.compile(group)?;
        }
        Ok(pass.finish())
    }
}

/// An in-progress compile
pub struct CompilePass<'a> {
    compiler: BindingCompiler<'a>,
    revision: u64,
    bindings: BTreeMap<String, Arc<Binding>>,
    tuples: HashMap<TrustTuple, String>,
    issuers: BTreeMap<String, Arc<Issuer>>,
}

impl<'a> CompilePass<'a> {
    /// Append the bindings for one group
    ///
    /// Duplicate detection covers everything compiled so far in this pass,
    /// not only the current group.
    pub fn compile(mut self, group: &BindingGroup) -> Result<Self> {
        if group.token_ttl > group.max_ttl {
            return Err(CompileError::InvalidTtl {
                token_ttl: group.token_ttl,
                max_ttl: group.max_ttl,
            });
        }

        let issuer = self
            .compiler
            .issuers
            .resolve(&group.issuer)
            .ok_or_else(|| CompileError::UnknownIssuer(group.issuer.clone()))?;

        if !self.compiler.policies.contains(&group.policy) {
            return Err(CompileError::UnknownPolicy(group.policy.clone()));
        }

        if group.environments.is_empty() {
            return Err(CompileError::EmptyDomain("environment"));
        }
        if group.operations.is_empty() {
            return Err(CompileError::EmptyDomain("operation"));
        }
        for environment in &group.environments {
            validate_name("environment", environment.as_str())?;
        }
        for operation in &group.operations {
            validate_name("operation", operation.as_str())?;
        }
        if let Some(prefix) = &group.key_prefix {
            validate_name("key prefix", prefix)?;
        }

        check_claims(&issuer, group)?;
        let audiences = resolve_audiences(&issuer, group)?;

        let mut environments = group.environments.clone();
        let mut operations = group.operations.clone();
        environments.sort();
        operations.sort();

        let mut staged: Vec<Binding> = Vec::with_capacity(environments.len() * operations.len());
        for environment in &environments {
            for operation in &operations {
                let key = match &group.key_prefix {
                    Some(prefix) => format!("{}-{}-{}", prefix, operation, environment),
                    None => format!("{}-{}", operation, environment),
                };

                let subject =
                    interpolate(&group.subject_template, environment.as_str(), operation.as_str())?;

                let mut bound_claims = BTreeMap::new();
                for (claim, value) in &group.bound_claims {
                    bound_claims.insert(
                        claim.clone(),
                        interpolate(value, environment.as_str(), operation.as_str())?,
                    );
                }

                staged.push(Binding {
                    key,
                    environment: environment.clone(),
                    operation: operation.clone(),
                    issuer_id: issuer.id.clone(),
                    issuer: issuer.issuer_url.clone(),
                    subject,
                    bound_audiences: audiences.clone(),
                    bound_claims,
                    claim_mappings: group.claim_mappings.clone(),
                    token_ttl: group.token_ttl,
                    max_ttl: group.max_ttl,
                    policy: group.policy.clone(),
                });
            }
        }

        for binding in staged {
            if self.bindings.contains_key(&binding.key) {
                warn!(binding = %binding.key, "Binding key collision, aborting compile");
                return Err(CompileError::DuplicateBinding(binding.key));
            }

            let tuple = binding.trust_tuple();
            if let Some(existing) = self.tuples.get(&tuple) {
                warn!(
                    binding = %binding.key,
                    existing = %existing,
                    "Bindings would accept identical tokens, aborting compile"
                );
                return Err(CompileError::DuplicateBinding(binding.key));
            }

            debug!(binding = %binding.key, policy = %binding.policy, "Compiled binding");
            self.tuples.insert(tuple, binding.key.clone());
            self.bindings.insert(binding.key.clone(), Arc::new(binding));
        }

        self.issuers
            .insert(issuer.issuer_url.clone(), Arc::clone(&issuer));

        Ok(self)
    }

    /// Number of bindings compiled so far
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Seal the pass into an immutable binding set
    pub fn finish(self) -> BindingSet {
        info!(
            revision = self.revision,
            bindings = self.bindings.len(),
            issuers = self.issuers.len(),
            "Compiled binding set"
        );
        BindingSet::from_parts(self.revision, self.bindings, self.issuers)
    }
}

fn check_claims(issuer: &Issuer, group: &BindingGroup) -> Result<()> {
    for claim in group.bound_claims.keys() {
        match issuer.claim_schema.claim_type(claim) {
            Some(claim_type) if claim_type.is_scalar() => {}
            _ => {
                return Err(CompileError::UnknownClaim {
                    issuer: issuer.id.clone(),
                    claim: claim.clone(),
                })
            }
        }
    }

    for claim in group.claim_mappings.keys() {
        if !issuer.claim_schema.declares(claim) {
            return Err(CompileError::UnknownClaim {
                issuer: issuer.id.clone(),
                claim: claim.clone(),
            });
        }
    }

    Ok(())
}

fn resolve_audiences(issuer: &Issuer, group: &BindingGroup) -> Result<BTreeSet<String>> {
    let audiences = match &group.bound_audiences {
        Some(audiences) => audiences.clone(),
        None => issuer.audiences.clone(),
    };

    if audiences.is_empty() {
        return Err(CompileError::EmptyDomain("audience"));
    }

    for audience in &audiences {
        if !issuer.audiences.contains(audience) {
            return Err(CompileError::AudienceNotAccepted {
                issuer: issuer.id.clone(),
                audience: audience.clone(),
            });
        }
    }

    Ok(audiences)
}
