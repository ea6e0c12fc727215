//! Bootstrap credential for administrative calls
//!
//! `serve` mints one credential at startup and prints its secret once. The
//! process keeps only the SHA-256 of the secret, compares presented values
//! in constant time and stops accepting it after its TTL. Configuration has
//! no way to supply a static administrative secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Number of random bytes in a minted secret
const SECRET_BYTES: usize = 32;

/// Operation a bootstrap credential authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapScope {
    /// Recompile and publish from the configuration file
    Reload,
}

impl fmt::Display for BootstrapScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapScope::Reload => write!(f, "reload"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("bootstrap credential expired")]
    Expired,

    #[error("bootstrap credential is not scoped for '{0}'")]
    WrongScope(BootstrapScope),

    #[error("bootstrap credential mismatch")]
    Mismatch,
}

/// A minted bootstrap credential; holds only the digest of its secret
#[derive(Debug, Clone)]
pub struct BootstrapCredential {
    pub id: Uuid,
    pub scope: BootstrapScope,
    pub expires_at: DateTime<Utc>,
    digest: [u8; 32],
}

impl BootstrapCredential {
    /// Mint a credential; the returned secret is not retained anywhere
    pub fn mint(scope: BootstrapScope, ttl: Duration) -> (Self, String) {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let secret = URL_SAFE_NO_PAD.encode(bytes);

        let credential = Self {
            id: Uuid::new_v4(),
            scope,
            expires_at: Utc::now() + ttl,
            digest: Sha256::digest(secret.as_bytes()).into(),
        };

        info!(
            credential_id = %credential.id,
            scope = %scope,
            expires_at = %credential.expires_at,
            "Minted bootstrap credential"
        );

        (credential, secret)
    }

    /// Check a presented secret for `scope` at `now`
    pub fn verify(
        &self,
        presented: &str,
        scope: BootstrapScope,
        now: DateTime<Utc>,
    ) -> Result<(), BootstrapError> {
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        if !bool::from(presented.ct_eq(&self.digest)) {
            warn!(credential_id = %self.id, "SECURITY: bootstrap credential mismatch");
            return Err(BootstrapError::Mismatch);
        }
        if scope != self.scope {
            warn!(credential_id = %self.id, scope = %scope, "SECURITY: bootstrap credential used out of scope");
            return Err(BootstrapError::WrongScope(scope));
        }
        if now >= self.expires_at {
            warn!(credential_id = %self.id, "SECURITY: expired bootstrap credential presented");
            return Err(BootstrapError::Expired);
        }
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
