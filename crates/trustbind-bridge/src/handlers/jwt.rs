//! JWT/OIDC token handler
//!
//! Verifies signed JWTs against the trust anchors of an issuer in the
//! snapshot: keys pinned inline, JWKS documents at configured URIs, or the
//! `jwks_uri` advertised by the issuer's discovery document.
//!
//! Expiry and audience are not checked here. The evaluator owns those
//! checks and their denial reasons.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trustbind_core::{BindingSet, IdentityToken, Issuer, Jwk, TrustAnchor};

use super::RawClaims;
use crate::bridge::TokenHandler;
use crate::error::{BridgeError, Result};
use crate::types::TokenFormat;

/// JWKS (JSON Web Key Set) response
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// The part of an OIDC discovery document we need
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// JWT/OIDC token handler
pub struct JwtHandler {
    /// Fetched key sets, by JWKS URL
    jwks_cache: Cache<String, Arc<Vec<Jwk>>>,
    /// Discovered JWKS URLs, by discovery URL
    discovery_cache: Cache<String, String>,
    /// HTTP client for discovery and JWKS
    http_client: reqwest::Client,
    /// Accepted signature algorithms
    algorithms: Vec<Algorithm>,
}

impl JwtHandler {
    /// Create a new JWT handler accepting RS256 and ES256
    pub fn new() -> Self {
        Self {
            jwks_cache: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .max_capacity(100)
                .build(),
            discovery_cache: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .max_capacity(100)
                .build(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            algorithms: vec![Algorithm::RS256, Algorithm::ES256],
        }
    }

    /// Replace the accepted algorithms (asymmetric algorithms only)
    pub fn with_algorithms(mut self, algorithms: &[Algorithm]) -> Self {
        self.algorithms = algorithms
            .iter()
            .copied()
            .filter(|alg| !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
            .collect();
        self
    }

    /// Fetch JWKS from a URL (with caching)
    async fn fetch_jwks(&self, url: &str, refresh: bool) -> Result<Arc<Vec<Jwk>>> {
        if refresh {
            self.jwks_cache.invalidate(url).await;
        } else if let Some(cached) = self.jwks_cache.get(url).await {
            debug!(url = %url, "Using cached JWKS");
            return Ok(cached);
        }

        debug!(url = %url, "Fetching JWKS");
        let response = self
            .http_client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| BridgeError::JwksFetchError(e.to_string()))?;

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::JwksFetchError(e.to_string()))?;

        let keys = Arc::new(jwks.keys);
        self.jwks_cache.insert(url.to_string(), keys.clone()).await;

        Ok(keys)
    }

    /// Resolve the JWKS URL advertised by an issuer's discovery document
    async fn discover_jwks_uri(&self, issuer: &Issuer) -> Result<String> {
        if let Some(cached) = self.discovery_cache.get(&issuer.discovery_url).await {
            return Ok(cached);
        }

        debug!(issuer = %issuer.id, url = %issuer.discovery_url, "Fetching discovery document");
        let document: DiscoveryDocument = self
            .http_client
            .get(&issuer.discovery_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| BridgeError::JwksFetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| BridgeError::JwksFetchError(e.to_string()))?;

        if document.issuer != issuer.issuer_url {
            warn!(
                issuer = %issuer.id,
                advertised = %document.issuer,
                "SECURITY: discovery document names a different issuer"
            );
            return Err(BridgeError::ValidationFailed(format!(
                "discovery document for {} advertises issuer {}",
                issuer.issuer_url, document.issuer
            )));
        }

        self.discovery_cache
            .insert(issuer.discovery_url.clone(), document.jwks_uri.clone())
            .await;
        Ok(document.jwks_uri)
    }

    /// All keys the issuer's trust anchors currently provide
    async fn issuer_keys(&self, issuer: &Issuer, refresh: bool) -> Result<Vec<Jwk>> {
        let mut keys = Vec::new();

        if issuer.trust_anchors.is_empty() {
            let url = self.discover_jwks_uri(issuer).await?;
            keys.extend(self.fetch_jwks(&url, refresh).await?.iter().cloned());
            return Ok(keys);
        }

        for anchor in &issuer.trust_anchors {
            match anchor {
                TrustAnchor::Jwk(jwk) => keys.push(jwk.clone()),
                TrustAnchor::JwksUri { url } => {
                    keys.extend(self.fetch_jwks(url, refresh).await?.iter().cloned());
                }
            }
        }

        Ok(keys)
    }

    /// Find the verification key for a token header
    async fn find_key(&self, issuer: &Issuer, kid: Option<&str>, alg: Algorithm) -> Result<Jwk> {
        let keys = self.issuer_keys(issuer, false).await?;
        if let Some(key) = select_key(&keys, kid, alg) {
            return Ok(key);
        }

        // Unknown kid: the issuer may have rotated keys since the last fetch
        let has_remote = issuer.trust_anchors.is_empty()
            || issuer
                .trust_anchors
                .iter()
                .any(|a| matches!(a, TrustAnchor::JwksUri { .. }));
        if has_remote {
            let keys = self.issuer_keys(issuer, true).await?;
            if let Some(key) = select_key(&keys, kid, alg) {
                return Ok(key);
            }
        }

        Err(BridgeError::KeyNotFound(
            kid.unwrap_or("no signing key for algorithm").to_string(),
        ))
    }
}

impl Default for JwtHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn key_type_for(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::ES256 | Algorithm::ES384 => "EC",
        Algorithm::EdDSA => "OKP",
        _ => "RSA",
    }
}

fn select_key(keys: &[Jwk], kid: Option<&str>, alg: Algorithm) -> Option<Jwk> {
    let kty = key_type_for(alg);
    keys.iter()
        .filter(|k| k.kty == kty)
        .filter(|k| k.key_use.as_deref().map_or(true, |u| u == "sig"))
        .find(|k| match kid {
            Some(kid) => k.kid.as_deref() == Some(kid),
            None => true,
        })
        .cloned()
}

/// Create a decoding key from a JWK
fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_ref()
                .ok_or_else(|| BridgeError::InvalidFormat("Missing RSA modulus".into()))?;
            let e = jwk
                .e
                .as_ref()
                .ok_or_else(|| BridgeError::InvalidFormat("Missing RSA exponent".into()))?;

            DecodingKey::from_rsa_components(n, e)
                .map_err(|e| BridgeError::InvalidFormat(e.to_string()))
        }
        "EC" => {
            let x = jwk
                .x
                .as_ref()
                .ok_or_else(|| BridgeError::InvalidFormat("Missing EC x coordinate".into()))?;
            let y = jwk
                .y
                .as_ref()
                .ok_or_else(|| BridgeError::InvalidFormat("Missing EC y coordinate".into()))?;

            DecodingKey::from_ec_components(x, y)
                .map_err(|e| BridgeError::InvalidFormat(e.to_string()))
        }
        kty => Err(BridgeError::UnsupportedAlgorithm(format!("Key type: {}", kty))),
    }
}

#[async_trait]
impl TokenHandler for JwtHandler {
    fn format(&self) -> TokenFormat {
        TokenFormat::Jwt
    }

    fn description(&self) -> &str {
        "JWT/OIDC handler"
    }

    /// Drop every cached key set and discovery result
    fn invalidate_cache(&self) {
        self.jwks_cache.invalidate_all();
        self.discovery_cache.invalidate_all();
    }

    async fn decode(&self, raw: &str, snapshot: &BindingSet) -> Result<IdentityToken> {
        // Step 1: Decode header to get kid and alg
        let header =
            decode_header(raw).map_err(|e| BridgeError::InvalidFormat(e.to_string()))?;
        let alg = header.alg;
        if !self.algorithms.contains(&alg) {
            warn!(alg = ?alg, "SECURITY: token signed with a rejected algorithm");
            return Err(BridgeError::UnsupportedAlgorithm(format!("{:?}", alg)));
        }

        // Step 2: Decode without verification to learn the issuer
        let mut peek = Validation::new(alg);
        peek.insecure_disable_signature_validation();
        peek.validate_exp = false;
        peek.validate_nbf = false;
        peek.validate_aud = false;
        peek.required_spec_claims.clear();

        let unverified = decode::<RawClaims>(raw, &DecodingKey::from_secret(&[]), &peek)
            .map_err(|e| BridgeError::InvalidFormat(e.to_string()))?;
        let issuer_url = unverified
            .claims
            .issuer()
            .ok_or_else(|| BridgeError::MissingClaim("iss".into()))?
            .to_string();

        // Step 3: The issuer must be trusted by this snapshot
        let issuer = snapshot
            .issuer(&issuer_url)
            .ok_or_else(|| BridgeError::UnknownIssuer(issuer_url.clone()))?;

        // Step 4: Find the verification key
        let jwk = self.find_key(issuer, header.kid.as_deref(), alg).await?;
        let decoding_key = decoding_key_from_jwk(&jwk)?;

        // Step 5: Verify signature, issuer and nbf
        let mut validation = Validation::new(alg);
        validation.set_issuer(&[issuer_url.as_str()]);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let verified = decode::<RawClaims>(raw, &decoding_key, &validation)?;
        verified.claims.into_identity_token(None)
    }
}
