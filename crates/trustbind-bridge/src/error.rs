//! Error types for the token bridge

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while turning a raw token into an identity token
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Token validation failed
    #[error("Token validation failed: {0}")]
    ValidationFailed(String),

    /// Token not yet valid (`nbf` in the future)
    #[error("Token not valid until {0}")]
    NotYetValid(String),

    /// Invalid token format
    #[error("Invalid token format: {0}")]
    InvalidFormat(String),

    /// Issuer is not part of the published snapshot
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// Invalid signature
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// JWKS or discovery fetch error
    #[error("Failed to fetch JWKS: {0}")]
    JwksFetchError(String),

    /// Key not found in the issuer's key set
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Unsupported algorithm
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Missing required claim
    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    /// No handler for the token format
    #[error("No handler registered for token format: {0}")]
    NoHandler(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl BridgeError {
    /// Whether the failure is an issuer the snapshot does not trust
    pub fn is_unknown_issuer(&self) -> bool {
        matches!(self, BridgeError::UnknownIssuer(_))
    }
}

impl From<jsonwebtoken::errors::Error> for BridgeError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ImmatureSignature => BridgeError::NotYetValid("JWT not yet valid".into()),
            ErrorKind::InvalidSignature => BridgeError::InvalidSignature(err.to_string()),
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                BridgeError::InvalidFormat(err.to_string())
            }
            ErrorKind::MissingRequiredClaim(claim) => BridgeError::MissingClaim(claim.clone()),
            ErrorKind::InvalidAlgorithm => BridgeError::UnsupportedAlgorithm(err.to_string()),
            _ => BridgeError::ValidationFailed(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::HttpError(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidFormat(err.to_string())
    }
}
