//! Sample token handler
//!
//! Decodes an unsigned JSON claim set, for dry-run evaluation from the CLI.
//! Never register this handler on a serving bridge.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use trustbind_core::{BindingSet, IdentityToken};

use super::RawClaims;
use crate::bridge::TokenHandler;
use crate::error::Result;
use crate::types::TokenFormat;

/// Sample token handler
///
/// Accepts a JSON object with the usual `iss`, `sub`, `aud`, `exp` and
/// `iat` claims plus any platform claims. A missing `exp` defaults to one
/// hour from now so saved samples stay usable.
pub struct SampleHandler;

impl SampleHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SampleHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenHandler for SampleHandler {
    fn format(&self) -> TokenFormat {
        TokenFormat::Sample
    }

    fn description(&self) -> &str {
        "unsigned sample token handler"
    }

    async fn decode(&self, raw: &str, _snapshot: &BindingSet) -> Result<IdentityToken> {
        let claims: RawClaims = serde_json::from_str(raw)?;
        claims.into_identity_token(Some(Utc::now() + Duration::hours(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[tokio::test]
    async fn test_sample_token() {
        let raw = r#"{
            "iss": "https://token.actions.githubusercontent.com",
            "sub": "repo:org/repo:environment:tf-apply-dev",
            "aud": "https://vault.example.com",
            "repository": "org/repo"
        }"#;
        let token = SampleHandler::new()
            .decode(raw, &BindingSet::empty())
            .await
            .unwrap();

        assert_eq!(token.issuer, "https://token.actions.githubusercontent.com");
        assert!(token.audience.contains("https://vault.example.com"));
        assert!(!token.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_past_exp_is_kept() {
        let raw = r#"{"iss": "https://issuer", "sub": "s", "exp": 1000}"#;
        let token = SampleHandler::new()
            .decode(raw, &BindingSet::empty())
            .await
            .unwrap();
        assert!(token.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let result = SampleHandler::new()
            .decode("{not json", &BindingSet::empty())
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidFormat(_))));
    }
}
