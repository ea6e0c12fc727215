//! trustbind serving plane
//!
//! Hosts the compiled binding set and evaluates CI/CD identity tokens
//! against it:
//! - Loads issuers, policies and binding groups from TOML
//! - Compiles and atomically publishes versioned binding sets
//! - Verifies presented JWTs and evaluates them under a deadline
//! - Appends every returned decision to a hash-chained audit trail
//! - Persists the published set for restart continuity and drift detection
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with revision and counts
//! - `POST /v1/evaluate` - Verify and evaluate a presented token
//! - `GET /v1/bindings` - Published revision, digest and binding records
//! - `POST /v1/admin/reload` - Recompile from the configuration file
//!   (bootstrap credential required)

pub mod api;
pub mod audit;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod snapshot;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use audit::{AuditError, AuditQueue, AuditRecord, AuditSink, FileAuditSink, MemoryAuditSink};
pub use bootstrap::{BootstrapCredential, BootstrapError, BootstrapScope};
pub use config::{Domain, TrustbindConfig};
pub use error::{ConfigError, PlaneError, Result};
pub use gateway::Gateway;
pub use snapshot::SnapshotHandle;
pub use storage::{
    FileSnapshotStore, MemorySnapshotStore, PersistedSnapshot, SnapshotStore, StorageError,
};
