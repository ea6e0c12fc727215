//! Shared helpers for plane integration tests
//!
//! Keys come from the bridge crate's ES256 fixtures: `issuer` is pinned in
//! the test configuration, `rogue` is an attacker's key.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;
use trustbind_bridge::handlers::JwtHandler;
use trustbind_bridge::{TokenBridge, TokenBridgeBuilder};
use trustbind_core::IdentityToken;
use trustbind_plane::{
    Gateway, MemoryAuditSink, MemorySnapshotStore, SnapshotStore, TrustbindConfig,
};

pub const ISSUER_PEM: &[u8] = include_bytes!("../../../trustbind-bridge/tests/fixtures/issuer_es256.pem");
pub const ROGUE_PEM: &[u8] = include_bytes!("../../../trustbind-bridge/tests/fixtures/rogue_es256.pem");

pub const ISSUER: &str = "https://token.actions.githubusercontent.com";
pub const AUDIENCE: &str = "https://vault.example.com";
pub const REPOSITORY: &str = "org/repo";

/// Configuration with one pinned GitHub-style issuer and a
/// {dev, prod} x {plan, apply} terraform group
pub fn config_toml(environments: &[&str]) -> String {
    let environments = environments
        .iter()
        .map(|e| format!("\"{}\"", e))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"
[server]
deadline_ms = 2000

[audit]
queue_depth = 16

[[issuers]]
id = "github-actions"
issuer_url = "{issuer}"
discovery_url = "{issuer}/.well-known/openid-configuration"
audiences = ["{audience}"]

[[issuers.trust_anchors]]
kind = "jwk"
kid = "issuer-key-1"
kty = "EC"
alg = "ES256"
use = "sig"
crv = "P-256"
x = "qd2oZpFETBwU-e4_ZY8d7y5JnVsCvyRs7sDun7A3FpI"
y = "VxoZL6xT5bgFrKEDvO1inZX-N0vd4XjU1pCxzqe4R3A"

[issuers.claim_schema]
repository = "string"
repository_owner_id = "string"

[[policies]]
name = "terraform"

[[policies.rules]]
path = "secret/data/terraform/*"
capabilities = ["read"]

[[bindings]]
issuer = "github-actions"
environments = [{environments}]
operations = ["plan", "apply"]
subject_template = "repo:{repository}:environment:tf-{{operation}}-{{environment}}"
policy = "terraform"
token_ttl = 900
max_ttl = 1800

[bindings.bound_claims]
repository = "{repository}"

[bindings.claim_mappings]
repository_owner_id = "owner_id"
"#,
        issuer = ISSUER,
        audience = AUDIENCE,
        environments = environments,
        repository = REPOSITORY,
    )
}

pub fn config(environments: &[&str]) -> TrustbindConfig {
    TrustbindConfig::parse(&config_toml(environments)).expect("test config should parse")
}

pub fn subject(operation: &str, environment: &str) -> String {
    format!("repo:{}:environment:tf-{}-{}", REPOSITORY, operation, environment)
}

/// A decoded token as the bridge would produce it
pub fn token(operation: &str, environment: &str) -> IdentityToken {
    IdentityToken::new(ISSUER, subject(operation, environment))
        .with_audience(AUDIENCE)
        .with_claim("repository", json!(REPOSITORY))
        .with_claim("repository_owner_id", json!("4242"))
}

/// Signed claims for a raw JWT
pub fn claims(issuer: &str, operation: &str, environment: &str) -> serde_json::Value {
    let now = Utc::now();
    json!({
        "iss": issuer,
        "sub": subject(operation, environment),
        "aud": AUDIENCE,
        "exp": (now + Duration::minutes(5)).timestamp(),
        "iat": now.timestamp(),
        "repository": REPOSITORY,
        "repository_owner_id": "4242",
    })
}

pub fn sign(claims: &serde_json::Value, pem: &[u8]) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some("issuer-key-1".to_string());
    let key = EncodingKey::from_ec_pem(pem).expect("fixture PEM should load");
    encode(&header, claims, &key).expect("signing should succeed")
}

pub fn bridge() -> TokenBridge {
    TokenBridgeBuilder::new()
        .with_handler(JwtHandler::new())
        .build()
}

/// Gateway over in-memory audit and snapshot storage
pub async fn gateway(
    config: &TrustbindConfig,
) -> (Gateway, Arc<MemoryAuditSink>, Arc<MemorySnapshotStore>) {
    gateway_with_sink(config, Arc::new(MemoryAuditSink::new())).await
}

pub async fn gateway_with_sink(
    config: &TrustbindConfig,
    sink: Arc<MemoryAuditSink>,
) -> (Gateway, Arc<MemoryAuditSink>, Arc<MemorySnapshotStore>) {
    let store = Arc::new(MemorySnapshotStore::new());
    let gateway = Gateway::start(
        config,
        sink.clone(),
        store.clone() as Arc<dyn SnapshotStore>,
        bridge(),
    )
    .await
    .expect("gateway should start");
    (gateway, sink, store)
}
