//! # trustbind core
//!
//! Binding compiler and claim evaluator for federating CI/CD pipeline
//! identity tokens (OIDC) into short-lived, scoped secrets-broker
//! credentials.
//!
//! ## Key Concepts
//!
//! - **Issuer**: a trusted token issuer, keyed by issuer URL
//! - **Binding**: maps one (environment, operation) trust context to a
//!   policy, an exact subject and TTL bounds
//! - **BindingSet**: an immutable, versioned snapshot of compiled bindings
//! - **Decision**: `Granted` or `Denied(reason)` for one presented token
//!
//! ## Invariants
//!
//! 1. Binding keys are unique within a set, and no two bindings accept the
//!    same (issuer, audiences, claims, subject) tuple
//! 2. `token_ttl <= max_ttl` for every binding
//! 3. Every binding references a registered issuer and an existing policy
//! 4. A compiled set never mutates; evaluation fails closed

pub mod binding;
pub mod compiler;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod issuer;
pub mod policy;
pub mod types;

pub use binding::{records_digest, Binding, BindingSet, BindingSetDiff};
pub use compiler::{interpolate, BindingCompiler, BindingGroup, CompilePass};
pub use decision::{Decision, Verdict};
pub use error::{CompileError, DenialReason, Result, ValidationError};
pub use evaluator::{EvalContext, Evaluator, Interrupted};
pub use issuer::{ClaimSchema, Issuer, IssuerRegistry, Jwk, TrustAnchor};
pub use policy::{CapabilityRule, Policy, PolicyStore};
pub use types::{ClaimType, Environment, IdentityToken, Operation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
