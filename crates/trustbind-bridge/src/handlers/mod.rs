//! Token handlers for different token formats

pub mod jwt;
pub mod sample;

pub use jwt::JwtHandler;
pub use sample::SampleHandler;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use trustbind_core::IdentityToken;

use crate::error::{BridgeError, Result};

/// Claim set shared by signed and sample tokens
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    iss: Option<String>,
    sub: Option<String>,
    /// Audience (string or array)
    aud: Option<serde_json::Value>,
    exp: Option<i64>,
    iat: Option<i64>,
    /// All other claims
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl RawClaims {
    pub(crate) fn issuer(&self) -> Option<&str> {
        self.iss.as_deref()
    }

    /// Build an identity token; `default_expiry` applies when `exp` is absent
    pub(crate) fn into_identity_token(
        self,
        default_expiry: Option<DateTime<Utc>>,
    ) -> Result<IdentityToken> {
        let issuer = self
            .iss
            .ok_or_else(|| BridgeError::MissingClaim("iss".into()))?;
        let subject = self
            .sub
            .ok_or_else(|| BridgeError::MissingClaim("sub".into()))?;

        let expiry = match self.exp {
            Some(exp) => timestamp(exp, "exp")?,
            None => default_expiry.ok_or_else(|| BridgeError::MissingClaim("exp".into()))?,
        };

        let mut token = IdentityToken::new(issuer, subject).expires_at(expiry);
        if let Some(iat) = self.iat {
            token = token.issued_at(timestamp(iat, "iat")?);
        }

        match self.aud {
            Some(serde_json::Value::String(aud)) => token = token.with_audience(aud),
            Some(serde_json::Value::Array(values)) => {
                for value in values {
                    let aud = value.as_str().ok_or_else(|| {
                        BridgeError::InvalidFormat("aud entries must be strings".into())
                    })?;
                    token = token.with_audience(aud);
                }
            }
            Some(_) => {
                return Err(BridgeError::InvalidFormat(
                    "aud must be a string or an array".into(),
                ))
            }
            None => {}
        }

        for (name, value) in self.extra {
            token = token.with_claim(name, value);
        }

        Ok(token)
    }
}

fn timestamp(secs: i64, claim: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| BridgeError::InvalidFormat(format!("{} out of range", claim)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audience_forms() {
        let single: RawClaims = serde_json::from_value(json!({
            "iss": "https://issuer", "sub": "s", "aud": "a", "exp": 4_102_444_800i64
        }))
        .unwrap();
        let token = single.into_identity_token(None).unwrap();
        assert!(token.audience.contains("a"));

        let many: RawClaims = serde_json::from_value(json!({
            "iss": "https://issuer", "sub": "s", "aud": ["a", "b"], "exp": 4_102_444_800i64
        }))
        .unwrap();
        assert_eq!(many.into_identity_token(None).unwrap().audience.len(), 2);

        let bad: RawClaims = serde_json::from_value(json!({
            "iss": "https://issuer", "sub": "s", "aud": 7, "exp": 4_102_444_800i64
        }))
        .unwrap();
        assert!(matches!(
            bad.into_identity_token(None),
            Err(BridgeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_extra_claims_kept() {
        let raw: RawClaims = serde_json::from_value(json!({
            "iss": "https://issuer", "sub": "s", "exp": 4_102_444_800i64,
            "repository": "org/repo", "run_attempt": 2
        }))
        .unwrap();
        let token = raw.into_identity_token(None).unwrap();
        assert_eq!(token.claim("repository"), Some(json!("org/repo")));
        assert_eq!(token.claim("run_attempt"), Some(json!(2)));
    }

    #[test]
    fn test_missing_exp_without_default() {
        let raw: RawClaims =
            serde_json::from_value(json!({"iss": "https://issuer", "sub": "s"})).unwrap();
        assert!(matches!(
            raw.into_identity_token(None),
            Err(BridgeError::MissingClaim(c)) if c == "exp"
        ));
    }
}
