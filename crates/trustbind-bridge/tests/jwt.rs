//! JWT verification tests against real ES256 keys
//!
//! The fixtures hold two P-256 key pairs: `issuer` is the trusted signing
//! key, `rogue` is an attacker's key presented under the trusted key id.

use axum::{routing::get, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trustbind_bridge::handlers::JwtHandler;
use trustbind_bridge::{BridgeError, TokenBridge, TokenBridgeBuilder, TokenFormat};
use trustbind_core::{
    BindingCompiler, BindingGroup, BindingSet, CapabilityRule, ClaimSchema, ClaimType,
    DenialReason, EvalContext, Evaluator, Issuer, IssuerRegistry, Jwk, Policy, PolicyStore,
    TrustAnchor, Verdict,
};

// =============================================================================
// Test Helpers
// =============================================================================

const ISSUER_PEM: &[u8] = include_bytes!("fixtures/issuer_es256.pem");
const ISSUER_JWK: &str = include_str!("fixtures/issuer_es256.jwk.json");
const ROGUE_PEM: &[u8] = include_bytes!("fixtures/rogue_es256.pem");

const ISSUER: &str = "https://token.actions.githubusercontent.com";
const AUDIENCE: &str = "https://vault.example.com";
const SUBJECT: &str = "repo:org/repo:environment:tf-apply-dev";

fn issuer_jwk() -> Jwk {
    serde_json::from_str(ISSUER_JWK).expect("fixture JWK should parse")
}

fn snapshot_for(issuer: Issuer) -> BindingSet {
    let registry = IssuerRegistry::new();
    let issuer_ref = issuer.id.clone();
    registry.register(issuer).expect("issuer should register");

    let mut policies = PolicyStore::new();
    policies
        .insert(Policy::new("terraform").with_rule(CapabilityRule::new("secret/*", &["read"])))
        .unwrap();

    let group = BindingGroup::new(
        issuer_ref,
        "repo:org/repo:environment:tf-{operation}-{environment}",
        "terraform",
    )
    .environments(&["dev"])
    .operations(&["apply"])
    .bound_claim("repository", "org/repo");

    BindingCompiler::new(&registry, &policies)
        .compile_all(&BindingSet::empty(), &[group])
        .expect("compile should succeed")
}

fn pinned_issuer() -> Issuer {
    Issuer::new(
        "github-actions",
        ISSUER,
        "https://token.actions.githubusercontent.com/.well-known/openid-configuration",
    )
    .with_audience(AUDIENCE)
    .with_trust_anchor(TrustAnchor::Jwk(issuer_jwk()))
    .with_claim_schema(ClaimSchema::new().with_claim("repository", ClaimType::String))
}

fn claims(issuer: &str) -> serde_json::Value {
    let now = Utc::now();
    json!({
        "iss": issuer,
        "sub": SUBJECT,
        "aud": AUDIENCE,
        "exp": (now + Duration::minutes(5)).timestamp(),
        "iat": now.timestamp(),
        "repository": "org/repo",
    })
}

fn sign(claims: &serde_json::Value, pem: &[u8], kid: &str) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_ec_pem(pem).expect("fixture PEM should load");
    encode(&header, claims, &key).expect("signing should succeed")
}

fn bridge() -> TokenBridge {
    TokenBridgeBuilder::new()
        .with_handler(JwtHandler::new())
        .build()
}

// =============================================================================
// Pinned keys
// =============================================================================

#[tokio::test]
async fn valid_token_decodes_and_is_granted() {
    let snapshot = snapshot_for(pinned_issuer());
    let raw = sign(&claims(ISSUER), ISSUER_PEM, "issuer-key-1");

    let token = bridge()
        .decode(&raw, TokenFormat::Jwt, &snapshot)
        .await
        .expect("token should verify");

    assert_eq!(token.issuer, ISSUER);
    assert_eq!(token.subject, SUBJECT);
    assert!(token.audience.contains(AUDIENCE));
    assert_eq!(token.claim("repository"), Some(json!("org/repo")));

    let decision = Evaluator::new()
        .evaluate(&token, &snapshot, &EvalContext::now())
        .unwrap();
    assert!(matches!(
        decision.verdict,
        Verdict::Granted { ref binding, .. } if binding == "apply-dev"
    ));
}

#[tokio::test]
async fn rogue_key_under_trusted_kid_is_rejected() {
    let snapshot = snapshot_for(pinned_issuer());
    let forged = sign(&claims(ISSUER), ROGUE_PEM, "issuer-key-1");

    let result = bridge().decode(&forged, TokenFormat::Jwt, &snapshot).await;
    assert!(matches!(result, Err(BridgeError::InvalidSignature(_))));
}

#[tokio::test]
async fn unknown_kid_with_pinned_keys_is_rejected() {
    let snapshot = snapshot_for(pinned_issuer());
    let raw = sign(&claims(ISSUER), ISSUER_PEM, "rotated-key-2");

    let result = bridge().decode(&raw, TokenFormat::Jwt, &snapshot).await;
    assert!(matches!(result, Err(BridgeError::KeyNotFound(kid)) if kid == "rotated-key-2"));
}

#[tokio::test]
async fn issuer_outside_snapshot_is_unknown() {
    let snapshot = snapshot_for(pinned_issuer());
    let raw = sign(&claims("https://gitlab.com"), ISSUER_PEM, "issuer-key-1");

    let err = bridge()
        .decode(&raw, TokenFormat::Jwt, &snapshot)
        .await
        .unwrap_err();
    assert!(err.is_unknown_issuer());
}

#[tokio::test]
async fn hmac_token_is_rejected_before_key_lookup() {
    let snapshot = snapshot_for(pinned_issuer());
    let raw = encode(
        &Header::new(Algorithm::HS256),
        &claims(ISSUER),
        &EncodingKey::from_secret(ISSUER_JWK.as_bytes()),
    )
    .unwrap();

    let result = bridge().decode(&raw, TokenFormat::Jwt, &snapshot).await;
    assert!(matches!(result, Err(BridgeError::UnsupportedAlgorithm(_))));
}

#[tokio::test]
async fn expired_token_verifies_and_evaluator_denies() {
    let snapshot = snapshot_for(pinned_issuer());
    let mut expired = claims(ISSUER);
    expired["exp"] = json!((Utc::now() - Duration::minutes(10)).timestamp());
    let raw = sign(&expired, ISSUER_PEM, "issuer-key-1");

    let token = bridge()
        .decode(&raw, TokenFormat::Jwt, &snapshot)
        .await
        .expect("signature is still valid");
    let decision = Evaluator::new()
        .evaluate(&token, &snapshot, &EvalContext::now())
        .unwrap();
    assert_eq!(decision.reason(), Some(DenialReason::Expired));
}

#[tokio::test]
async fn missing_subject_is_rejected() {
    let snapshot = snapshot_for(pinned_issuer());
    let mut no_sub = claims(ISSUER);
    no_sub.as_object_mut().unwrap().remove("sub");
    let raw = sign(&no_sub, ISSUER_PEM, "issuer-key-1");

    let result = bridge().decode(&raw, TokenFormat::Jwt, &snapshot).await;
    assert!(matches!(result, Err(BridgeError::MissingClaim(c)) if c == "sub"));
}

#[tokio::test]
async fn garbage_is_invalid_format() {
    let snapshot = snapshot_for(pinned_issuer());
    let result = bridge()
        .decode("eyJnot.a.token", TokenFormat::Jwt, &snapshot)
        .await;
    assert!(matches!(result, Err(BridgeError::InvalidFormat(_))));
}

// =============================================================================
// Discovery and JWKS over HTTP
// =============================================================================

/// Serve a discovery document and JWKS on loopback; returns (base URL, JWKS hits)
async fn serve_issuer(advertised_issuer: Option<String>) -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));

    let discovery = json!({
        "issuer": advertised_issuer.unwrap_or_else(|| base.clone()),
        "jwks_uri": format!("{}/jwks", base),
    });
    let jwks = json!({ "keys": [serde_json::from_str::<serde_json::Value>(ISSUER_JWK).unwrap()] });

    let counter = hits.clone();
    let app = Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(move || {
                let discovery = discovery.clone();
                async move { Json(discovery) }
            }),
        )
        .route(
            "/jwks",
            get(move || {
                let jwks = jwks.clone();
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(jwks)
                }
            }),
        );

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base, hits)
}

fn discovered_issuer(base: &str) -> Issuer {
    Issuer::new(
        "local-ci",
        base,
        format!("{}/.well-known/openid-configuration", base),
    )
    .with_audience(AUDIENCE)
    .with_claim_schema(ClaimSchema::new().with_claim("repository", ClaimType::String))
}

#[tokio::test]
async fn keys_found_through_discovery_and_cached() {
    let (base, hits) = serve_issuer(None).await;
    let snapshot = snapshot_for(discovered_issuer(&base));
    let bridge = bridge();

    for _ in 0..3 {
        let raw = sign(&claims(&base), ISSUER_PEM, "issuer-key-1");
        let token = bridge
            .decode(&raw, TokenFormat::Jwt, &snapshot)
            .await
            .expect("token should verify through discovery");
        assert_eq!(token.issuer, base);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalidated_caches_refetch_keys() {
    let (base, hits) = serve_issuer(None).await;
    let snapshot = snapshot_for(discovered_issuer(&base));
    let bridge = bridge();

    let raw = sign(&claims(&base), ISSUER_PEM, "issuer-key-1");
    bridge.decode(&raw, TokenFormat::Jwt, &snapshot).await.unwrap();
    bridge.decode(&raw, TokenFormat::Jwt, &snapshot).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    bridge.invalidate_caches();
    bridge.decode(&raw, TokenFormat::Jwt, &snapshot).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_kid_triggers_one_refetch() {
    let (base, hits) = serve_issuer(None).await;
    let snapshot = snapshot_for(discovered_issuer(&base));

    let raw = sign(&claims(&base), ISSUER_PEM, "not-published");
    let result = bridge().decode(&raw, TokenFormat::Jwt, &snapshot).await;

    assert!(matches!(result, Err(BridgeError::KeyNotFound(_))));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn discovery_naming_another_issuer_is_rejected() {
    let (base, _) = serve_issuer(Some("https://evil.example.com".into())).await;
    let snapshot = snapshot_for(discovered_issuer(&base));

    let raw = sign(&claims(&base), ISSUER_PEM, "issuer-key-1");
    let result = bridge().decode(&raw, TokenFormat::Jwt, &snapshot).await;
    assert!(matches!(result, Err(BridgeError::ValidationFailed(_))));
}

#[tokio::test]
async fn jwks_uri_anchor_skips_discovery() {
    let (base, hits) = serve_issuer(None).await;
    let issuer = Issuer::new(
        "local-ci",
        base.as_str(),
        "https://unreachable.invalid/.well-known/openid-configuration",
    )
    .with_audience(AUDIENCE)
    .with_trust_anchor(TrustAnchor::JwksUri {
        url: format!("{}/jwks", base),
    })
    .with_claim_schema(ClaimSchema::new().with_claim("repository", ClaimType::String));
    let snapshot = snapshot_for(issuer);

    let raw = sign(&claims(&base), ISSUER_PEM, "issuer-key-1");
    bridge()
        .decode(&raw, TokenFormat::Jwt, &snapshot)
        .await
        .expect("token should verify through the JWKS anchor");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
