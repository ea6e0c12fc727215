//! Attack scenario tests
//!
//! Each test represents a way a pipeline token could be abused to obtain
//! credentials it was never meant to get. All of them must be denied.

use serde_json::json;
use trustbind_core::{
    BindingCompiler, BindingGroup, BindingSet, CapabilityRule, ClaimSchema, ClaimType,
    DenialReason, EvalContext, Evaluator, IdentityToken, Issuer, IssuerRegistry, Policy,
    PolicyStore,
};

// =============================================================================
// Test Helpers
// =============================================================================

const GITHUB: &str = "https://token.actions.githubusercontent.com";
const GITLAB: &str = "https://gitlab.com";
const VAULT: &str = "https://vault.example.com";

fn snapshot() -> BindingSet {
    let registry = IssuerRegistry::new();
    registry
        .register(
            Issuer::new(
                "github-actions",
                GITHUB,
                "https://token.actions.githubusercontent.com/.well-known/openid-configuration",
            )
            .with_audience(VAULT)
            .with_audience("sts.amazonaws.com")
            .with_claim_schema(
                ClaimSchema::new()
                    .with_claim("repository", ClaimType::String)
                    .with_claim("repository_owner_id", ClaimType::Number)
                    .with_claim("ref", ClaimType::String),
            ),
        )
        .expect("github issuer should register");
    registry
        .register(
            Issuer::new(
                "gitlab",
                GITLAB,
                "https://gitlab.com/.well-known/openid-configuration",
            )
            .with_audience(VAULT),
        )
        .expect("gitlab issuer should register");

    let mut policies = PolicyStore::new();
    policies
        .insert(
            Policy::new("prod-deploy")
                .with_rule(CapabilityRule::new("secret/data/prod/*", &["read"])),
        )
        .expect("policy should insert");

    let github = BindingGroup::new(
        "github-actions",
        "repo:org/infra:environment:{environment}-{operation}",
        "prod-deploy",
    )
    .environments(&["prod"])
    .operations(&["apply"])
    .bound_audiences(&[VAULT])
    .bound_claim("repository", "org/infra")
    .bound_claim("repository_owner_id", "4242");

    BindingCompiler::new(&registry, &policies)
        .compile_all(&BindingSet::empty(), &[github])
        .expect("compile should succeed")
}

fn legitimate() -> IdentityToken {
    IdentityToken::new(GITHUB, "repo:org/infra:environment:prod-apply")
        .with_audience(VAULT)
        .with_claim("repository", json!("org/infra"))
        .with_claim("repository_owner_id", json!(4242))
}

fn reason(token: &IdentityToken) -> Option<DenialReason> {
    Evaluator::new()
        .evaluate(token, &snapshot(), &EvalContext::now())
        .expect("evaluation should complete")
        .reason()
}

#[test]
fn legitimate_token_is_granted() {
    assert_eq!(reason(&legitimate()), None);
}

// =============================================================================
// ATTACK: Fork or renamed repository
// =============================================================================

/// A fork re-creates the same environment name so its subject looks right,
/// but its repository claim names the fork.
#[test]
fn attack_fork_with_copied_subject_denied() {
    let fork = legitimate().with_claim("repository", json!("attacker/infra"));
    assert_eq!(reason(&fork), Some(DenialReason::ClaimMismatch));
}

/// An attacker re-registers a deleted organization name. The owner id
/// claim no longer matches the original.
#[test]
fn attack_resurrected_owner_name_denied() {
    let squatter = legitimate().with_claim("repository_owner_id", json!(9999));
    assert_eq!(reason(&squatter), Some(DenialReason::ClaimMismatch));
}

/// A claim must carry the type the issuer's schema declares. A string with
/// the same digits as a numeric owner id does not match it.
#[test]
fn attack_claim_type_confusion_denied() {
    let confused = legitimate().with_claim("repository_owner_id", json!(true));
    assert_eq!(reason(&confused), Some(DenialReason::ClaimMismatch));

    let stringly = legitimate().with_claim("repository_owner_id", json!("4242"));
    assert_eq!(reason(&stringly), Some(DenialReason::ClaimMismatch));

    let list = legitimate().with_claim("repository", json!(["org/infra"]));
    assert_eq!(reason(&list), Some(DenialReason::ClaimMismatch));
}

// =============================================================================
// ATTACK: Subject manipulation
// =============================================================================

/// Subjects are compared exactly. Wildcards and prefixes grant nothing.
#[test]
fn attack_subject_prefix_and_wildcard_denied() {
    for subject in [
        "repo:org/infra:environment:prod-apply-extra",
        "repo:org/infra:environment:prod-*",
        "repo:org/infra:environment:*",
        "REPO:org/infra:environment:prod-apply",
        "",
    ] {
        let token = IdentityToken::new(GITHUB, subject)
            .with_audience(VAULT)
            .with_claim("repository", json!("org/infra"))
            .with_claim("repository_owner_id", json!(4242));
        assert_eq!(
            reason(&token),
            Some(DenialReason::SubjectMismatch),
            "subject {:?} must be denied",
            subject
        );
    }
}

/// A pull request job asking for the production apply role
#[test]
fn attack_pull_request_subject_denied() {
    let pr = IdentityToken::new(GITHUB, "repo:org/infra:pull_request")
        .with_audience(VAULT)
        .with_claim("repository", json!("org/infra"))
        .with_claim("repository_owner_id", json!(4242));
    assert_eq!(reason(&pr), Some(DenialReason::SubjectMismatch));
}

// =============================================================================
// ATTACK: Audience confusion
// =============================================================================

/// A token minted for a different relying party must not be replayed here,
/// even though the issuer accepts that audience in general.
#[test]
fn attack_token_for_other_relying_party_denied() {
    let mut replayed = legitimate();
    replayed.audience.clear();
    let replayed = replayed.with_audience("sts.amazonaws.com");
    assert_eq!(reason(&replayed), Some(DenialReason::AudienceMismatch));
}

// =============================================================================
// ATTACK: Issuer confusion
// =============================================================================

/// A second trusted platform presents the exact subject and claims of a
/// binding it does not own.
#[test]
fn attack_cross_issuer_subject_collision_denied() {
    let gitlab = IdentityToken::new(GITLAB, "repo:org/infra:environment:prod-apply")
        .with_audience(VAULT)
        .with_claim("repository", json!("org/infra"))
        .with_claim("repository_owner_id", json!(4242));
    // gitlab is registered but has no binding in this snapshot
    assert_eq!(reason(&gitlab), Some(DenialReason::IssuerUnknown));
}

/// Issuer comparison is exact: a lookalike host or a trailing path fails.
#[test]
fn attack_lookalike_issuer_denied() {
    for issuer in [
        "https://token.actions.githubusercontent.com.evil.example",
        "https://token.actions.githubusercontent.com/",
        "http://token.actions.githubusercontent.com",
    ] {
        let token = IdentityToken::new(issuer, "repo:org/infra:environment:prod-apply")
            .with_audience(VAULT)
            .with_claim("repository", json!("org/infra"))
            .with_claim("repository_owner_id", json!(4242));
        assert_eq!(
            reason(&token),
            Some(DenialReason::IssuerUnknown),
            "issuer {} must be unknown",
            issuer
        );
    }
}

// =============================================================================
// ATTACK: Replay after expiry
// =============================================================================

#[test]
fn attack_expired_token_replay_denied() {
    let stale = legitimate().expires_at(chrono::Utc::now() - chrono::Duration::seconds(30));
    assert_eq!(reason(&stale), Some(DenialReason::Expired));
}

/// Expiry exactly at the evaluation instant counts as expired
#[test]
fn attack_expiry_boundary_denied() {
    let now = chrono::Utc::now();
    let token = legitimate().expires_at(now);
    let decision = Evaluator::new()
        .evaluate(&token, &snapshot(), &EvalContext::new(now))
        .expect("evaluation should complete");
    assert_eq!(decision.reason(), Some(DenialReason::Expired));
}
