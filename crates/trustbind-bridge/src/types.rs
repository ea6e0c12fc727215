//! Core types for the token bridge

use serde::{Deserialize, Serialize};

/// Formats a presented token can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFormat {
    /// Signed JWT from an OIDC issuer
    Jwt,
    /// Already-decoded JSON token, for dry runs
    Sample,
}

impl std::fmt::Display for TokenFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenFormat::Jwt => write!(f, "jwt"),
            TokenFormat::Sample => write!(f, "sample"),
        }
    }
}

impl std::str::FromStr for TokenFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jwt" | "oidc" => Ok(TokenFormat::Jwt),
            "sample" | "json" => Ok(TokenFormat::Sample),
            _ => Err(format!("Unknown token format: {}", s)),
        }
    }
}
