//! Error types for the serving plane

use std::path::PathBuf;
use thiserror::Error;
use trustbind_bridge::BridgeError;
use trustbind_core::{CompileError, ValidationError};

use crate::audit::AuditError;
use crate::storage::StorageError;

/// Errors raised while loading configuration
///
/// Every variant is fatal at startup: the plane refuses to serve with a
/// configuration it could not fully load.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A static bootstrap secret was found in the configuration
    #[error("static bootstrap secrets are not accepted ('{0}'); a scoped bootstrap credential is minted at startup")]
    StaticBootstrapSecret(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },
}

/// Top-level plane errors
#[derive(Error, Debug)]
pub enum PlaneError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    /// A sample token could not be decoded
    #[error("token error: {0}")]
    Token(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A snapshot may only replace one with a lower revision
    #[error("snapshot revision {offered} does not supersede published revision {current}")]
    StaleRevision { current: u64, offered: u64 },
}

/// Result type for plane operations
pub type Result<T> = std::result::Result<T, PlaneError>;
