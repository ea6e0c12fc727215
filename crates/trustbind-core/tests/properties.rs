//! Property-based tests for compile and evaluate invariants
//!
//! 1. COUNT: a group compiles to exactly |environments| × |operations| bindings
//! 2. DETERMINISM: the same inputs always produce byte-identical records
//! 3. UNIQUENESS: no two bindings share a trust tuple
//! 4. TTL: a granted TTL never exceeds the binding's bounds or the request
//! 5. ISOLATION: tokens from unregistered issuers are never granted

use proptest::collection::btree_set;
use proptest::prelude::*;
use std::collections::HashSet;
use trustbind_core::{
    BindingCompiler, BindingGroup, BindingSet, CapabilityRule, DenialReason, EvalContext,
    Evaluator, IdentityToken, Issuer, IssuerRegistry, Policy, PolicyStore, Verdict,
};

const ISSUER_URL: &str = "https://token.actions.githubusercontent.com";
const AUDIENCE: &str = "https://vault.example.com";

fn fixtures() -> (IssuerRegistry, PolicyStore) {
    let registry = IssuerRegistry::new();
    registry
        .register(
            Issuer::new(
                "github-actions",
                ISSUER_URL,
                "https://token.actions.githubusercontent.com/.well-known/openid-configuration",
            )
            .with_audience(AUDIENCE),
        )
        .expect("issuer should register");

    let mut policies = PolicyStore::new();
    policies
        .insert(Policy::new("deploy").with_rule(CapabilityRule::new("secret/*", &["read"])))
        .expect("policy should insert");

    (registry, policies)
}

fn group(environments: &[String], operations: &[String], ttl: (u64, u64)) -> BindingGroup {
    let environments: Vec<&str> = environments.iter().map(String::as_str).collect();
    let operations: Vec<&str> = operations.iter().map(String::as_str).collect();
    BindingGroup::new(
        "github-actions",
        "repo:org/repo:environment:{environment}-{operation}",
        "deploy",
    )
    .environments(&environments)
    .operations(&operations)
    .ttl(ttl.0, ttl.1)
}

fn names() -> impl Strategy<Value = Vec<String>> {
    btree_set("[a-z][a-z0-9]{0,7}", 1..6).prop_map(|s| s.into_iter().collect())
}

fn compile(group: &BindingGroup) -> BindingSet {
    let (registry, policies) = fixtures();
    BindingCompiler::new(&registry, &policies)
        .compile_all(&BindingSet::empty(), std::slice::from_ref(group))
        .expect("compile should succeed")
}

// =============================================================================
// COUNT and DETERMINISM
// =============================================================================

proptest! {
    /// Every (environment, operation) pair yields exactly one binding
    #[test]
    fn prop_binding_count_is_domain_product(
        environments in names(),
        operations in names(),
    ) {
        let set = compile(&group(&environments, &operations, (900, 3600)));
        prop_assert_eq!(set.len(), environments.len() * operations.len());

        for environment in &environments {
            for operation in &operations {
                let key = format!("{}-{}", operation, environment);
                prop_assert!(set.contains_key(&key), "missing {}", key);
            }
        }
    }

    /// Declaration order does not affect the compiled records
    #[test]
    fn prop_compile_is_deterministic(
        environments in names(),
        operations in names(),
    ) {
        let forward = compile(&group(&environments, &operations, (900, 3600)));

        let mut reversed_envs = environments.clone();
        reversed_envs.reverse();
        let mut reversed_ops = operations.clone();
        reversed_ops.reverse();
        let reversed = compile(&group(&reversed_envs, &reversed_ops, (900, 3600)));

        prop_assert_eq!(forward.records(), reversed.records());
        prop_assert_eq!(forward.digest(), reversed.digest());
    }

    /// No two compiled bindings accept the same token
    #[test]
    fn prop_no_duplicate_trust_tuples(
        environments in names(),
        operations in names(),
    ) {
        let set = compile(&group(&environments, &operations, (900, 3600)));
        let tuples: HashSet<_> = set.iter().map(|b| b.trust_tuple()).collect();
        prop_assert_eq!(tuples.len(), set.len());
    }
}

// =============================================================================
// TTL and ISOLATION
// =============================================================================

proptest! {
    /// A grant never exceeds token_ttl, max_ttl or the requested TTL
    #[test]
    fn prop_granted_ttl_is_bounded(
        token_ttl in 1u64..10_000,
        extra in 0u64..10_000,
        requested in proptest::option::of(1u64..20_000),
    ) {
        let max_ttl = token_ttl + extra;
        let set = compile(&group(&["dev".into()], &["plan".into()], (token_ttl, max_ttl)));

        let token = IdentityToken::new(ISSUER_URL, "repo:org/repo:environment:dev-plan")
            .with_audience(AUDIENCE);
        let ctx = EvalContext::now().with_requested_ttl(requested);
        let decision = Evaluator::new().evaluate(&token, &set, &ctx).unwrap();

        match decision.verdict {
            Verdict::Granted { effective_ttl, .. } => {
                prop_assert!(effective_ttl <= token_ttl);
                prop_assert!(effective_ttl <= max_ttl);
                if let Some(requested) = requested {
                    prop_assert!(effective_ttl <= requested);
                }
            }
            other => prop_assert!(false, "expected grant, got {:?}", other),
        }
    }

    /// Tokens from an issuer that is not in the snapshot are always denied
    #[test]
    fn prop_unknown_issuer_never_granted(
        host in "[a-z]{3,12}",
        environments in names(),
        operations in names(),
    ) {
        let issuer = format!("https://{}.example.org", host);
        let set = compile(&group(&environments, &operations, (900, 3600)));

        let subject = format!(
            "repo:org/repo:environment:{}-{}",
            environments[0], operations[0]
        );
        let token = IdentityToken::new(issuer, subject).with_audience(AUDIENCE);
        let decision = Evaluator::new()
            .evaluate(&token, &set, &EvalContext::now())
            .unwrap();

        prop_assert_eq!(decision.reason(), Some(DenialReason::IssuerUnknown));
    }

    /// Exactly one binding grants each compiled subject
    #[test]
    fn prop_each_subject_grants_its_own_binding(
        environments in names(),
        operations in names(),
    ) {
        let set = compile(&group(&environments, &operations, (900, 3600)));
        for binding in set.iter() {
            let token = IdentityToken::new(ISSUER_URL, binding.subject.clone())
                .with_audience(AUDIENCE);
            let decision = Evaluator::new()
                .evaluate(&token, &set, &EvalContext::now())
                .unwrap();
            match decision.verdict {
                Verdict::Granted { binding: key, .. } => prop_assert_eq!(&key, &binding.key),
                other => prop_assert!(false, "expected grant, got {:?}", other),
            }
        }
    }
}
