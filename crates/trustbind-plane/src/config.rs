//! TOML configuration for the serving plane
//!
//! One file declares the trusted issuers, the capability policies and the
//! binding groups to compile, plus runtime knobs for the server, the audit
//! log and snapshot persistence. Runtime knobs can be overridden from the
//! environment (`TRUSTBIND_PORT`, `TRUSTBIND_AUDIT_LOG`,
//! `TRUSTBIND_STATE_DIR`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use trustbind_core::{
    BindingCompiler, BindingGroup, BindingSet, CompileError, Issuer, IssuerRegistry, Policy,
    PolicyStore,
};

use crate::error::ConfigError;

/// Upper bound on the bootstrap credential lifetime
const MAX_BOOTSTRAP_TTL_SECS: u64 = 86_400;

/// Keys that would carry a long-lived administrative secret
const STATIC_SECRET_KEYS: &[&str] = &["bootstrap_token", "root_token"];

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustbindConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub state: StateConfig,

    /// Trusted issuers
    #[serde(default)]
    pub issuers: Vec<Issuer>,

    /// Capability policies
    #[serde(default)]
    pub policies: Vec<Policy>,

    /// Binding groups to compile
    #[serde(default)]
    pub bindings: Vec<BindingGroup>,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Default per-request evaluation deadline in milliseconds
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Lifetime of the bootstrap credential minted at startup, in seconds
    /// (at most one day)
    #[serde(default = "default_bootstrap_ttl")]
    pub bootstrap_ttl_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_deadline_ms() -> u64 {
    2000
}

fn default_bootstrap_ttl() -> u64 {
    900
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            deadline_ms: default_deadline_ms(),
            bootstrap_ttl_secs: default_bootstrap_ttl(),
        }
    }
}

impl ServerConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn bootstrap_ttl(&self) -> chrono::Duration {
        let secs = self.bootstrap_ttl_secs.min(MAX_BOOTSTRAP_TTL_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Audit log settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// JSON-lines audit file
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,

    /// Bounded depth of the audit queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("trustbind-audit.jsonl")
}

fn default_queue_depth() -> usize {
    1024
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Snapshot persistence settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Directory holding `bindings.json`
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("trustbind-state")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

impl TrustbindConfig {
    /// Load configuration from a TOML file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        info!(
            path = %path.display(),
            issuers = config.issuers.len(),
            policies = config.policies.len(),
            groups = config.bindings.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: toml::Value = toml::from_str(content)?;
        if let Some(key) = find_static_secret(&raw) {
            return Err(ConfigError::StaticBootstrapSecret(key));
        }
        Ok(raw.try_into()?)
    }

    /// Apply `TRUSTBIND_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("TRUSTBIND_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "TRUSTBIND_PORT".into(),
                value: port.clone(),
            })?;
        }
        if let Some(path) = lookup("TRUSTBIND_AUDIT_LOG") {
            self.audit.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("TRUSTBIND_STATE_DIR") {
            self.state.dir = PathBuf::from(dir);
        }
        Ok(self)
    }

    /// Register issuers and policies for one load
    ///
    /// Every load gets a fresh registry so that an issuer removed from the
    /// file can never be resolved by a later compile.
    pub fn domain(&self) -> Result<Domain, ConfigError> {
        let issuers = IssuerRegistry::new();
        issuers.begin_cycle();
        for issuer in &self.issuers {
            issuers.register(issuer.clone())?;
        }

        let mut policies = PolicyStore::new();
        for policy in &self.policies {
            policies.insert(policy.clone())?;
        }

        debug!(
            issuers = issuers.len(),
            policies = policies.len(),
            "Configuration domain loaded"
        );

        Ok(Domain {
            issuers,
            policies,
            groups: self.bindings.clone(),
        })
    }
}

/// Validated issuers and policies plus the groups to compile against them
pub struct Domain {
    pub issuers: IssuerRegistry,
    pub policies: PolicyStore,
    pub groups: Vec<BindingGroup>,
}

impl Domain {
    /// Compile a set that supersedes `previous`
    pub fn compile(&self, previous: &BindingSet) -> Result<BindingSet, CompileError> {
        self.compile_at(previous.revision() + 1)
    }

    /// Compile a set carrying an explicit revision
    pub fn compile_at(&self, revision: u64) -> Result<BindingSet, CompileError> {
        let compiler = BindingCompiler::new(&self.issuers, &self.policies);
        let mut pass = compiler.begin_at(revision);
        for group in &self.groups {
            pass = pass.compile(group)?;
        }
        Ok(pass.finish())
    }
}

fn find_static_secret(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::Table(table) => table.iter().find_map(|(key, value)| {
            if STATIC_SECRET_KEYS.contains(&key.as_str()) {
                Some(key.clone())
            } else {
                find_static_secret(value)
            }
        }),
        toml::Value::Array(items) => items.iter().find_map(find_static_secret),
        _ => None,
    }
}
