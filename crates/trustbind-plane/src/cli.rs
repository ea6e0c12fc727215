//! `trustbind` command line
//!
//! Exit codes:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | success / granted / no drift |
//! | 1 | configuration, compile or I/O error |
//! | 2 | denied |
//! | 3 | denied as ambiguous |
//! | 4 | evaluation deadline exceeded |
//! | 5 | compiled bindings drift from the persisted snapshot |
//! | 6 | audit chain broken |

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use trustbind_bridge::handlers::{JwtHandler, SampleHandler};
use trustbind_bridge::{TokenBridgeBuilder, TokenFormat};
use trustbind_core::{BindingSet, Decision, DenialReason, EvalContext, Evaluator, Interrupted};

use crate::api::{create_router, handlers::AppState, handlers::EvaluateResponse};
use crate::audit::{read_records, verify_chain, AuditError, FileAuditSink};
use crate::bootstrap::{BootstrapCredential, BootstrapScope};
use crate::config::TrustbindConfig;
use crate::error::{ConfigError, PlaneError};
use crate::gateway::Gateway;
use crate::storage::{FileSnapshotStore, SnapshotStore};

pub const EXIT_OK: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_DENIED: u8 = 2;
pub const EXIT_AMBIGUOUS: u8 = 3;
pub const EXIT_TIMEOUT: u8 = 4;
pub const EXIT_DRIFT: u8 = 5;
pub const EXIT_AUDIT_BROKEN: u8 = 6;

/// Compile CI/CD trust bindings and evaluate identity tokens against them
#[derive(Parser, Debug)]
#[command(name = "trustbind", version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "TRUSTBIND_CONFIG",
        default_value = "trustbind.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, validate and compile; print the binding records
    Compile {
        /// Also write the records to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Dry-run evaluation of a sample (already decoded) token
    Evaluate {
        /// JSON claim set with iss, sub, aud, exp and platform claims
        #[arg(long)]
        token: PathBuf,

        /// Requested credential lifetime in seconds
        #[arg(long)]
        requested_ttl: Option<u64>,

        /// Evaluation deadline in milliseconds
        #[arg(long, default_value = "2000")]
        deadline_ms: u64,
    },

    /// Start the HTTP plane
    Serve,

    /// Compare a fresh compile with the persisted snapshot
    Diff {
        /// State directory; defaults to the configured one
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Verify the hash chain of an audit log
    VerifyAudit {
        /// Audit file; defaults to the configured one
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Run a parsed command line and map the outcome to an exit code
pub async fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Commands::Compile { out } => cmd_compile(&cli.config, out.as_deref()),
        Commands::Evaluate {
            token,
            requested_ttl,
            deadline_ms,
        } => {
            cmd_evaluate(
                &cli.config,
                &token,
                requested_ttl,
                Duration::from_millis(deadline_ms),
            )
            .await
        }
        Commands::Serve => cmd_serve(&cli.config).await,
        Commands::Diff { state_dir } => cmd_diff(&cli.config, state_dir).await,
        Commands::VerifyAudit { path } => cmd_verify_audit(&cli.config, path).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Load configuration and apply environment overrides
pub fn load_config(path: &Path) -> Result<TrustbindConfig, ConfigError> {
    TrustbindConfig::from_file(path)?.with_env_overrides()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PlaneError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// compile
// =============================================================================

fn cmd_compile(config_path: &Path, out: Option<&Path>) -> Result<u8, PlaneError> {
    let config = load_config(config_path)?;
    let set = config.domain()?.compile(&BindingSet::empty())?;
    let records = set.records();

    if let Some(out) = out {
        std::fs::write(out, serde_json::to_vec_pretty(&records)?)?;
        info!(path = %out.display(), bindings = records.len(), "Wrote binding records");
    }
    print_json(&records)?;
    Ok(EXIT_OK)
}

// =============================================================================
// evaluate
// =============================================================================

/// Exit code for a dry-run decision
pub fn decision_exit_code(decision: &Decision) -> u8 {
    match decision.reason() {
        None => EXIT_OK,
        Some(DenialReason::Ambiguous) => EXIT_AMBIGUOUS,
        Some(DenialReason::Timeout) => EXIT_TIMEOUT,
        Some(_) => EXIT_DENIED,
    }
}

async fn cmd_evaluate(
    config_path: &Path,
    token_path: &Path,
    requested_ttl: Option<u64>,
    deadline: Duration,
) -> Result<u8, PlaneError> {
    let config = load_config(config_path)?;
    let set = config.domain()?.compile(&BindingSet::empty())?;

    let raw = std::fs::read_to_string(token_path)?;
    let bridge = TokenBridgeBuilder::new()
        .with_handler(SampleHandler::new())
        .build();
    let token = bridge.decode(&raw, TokenFormat::Sample, &set).await?;

    let ctx = EvalContext::now()
        .with_requested_ttl(requested_ttl)
        .with_deadline(Instant::now() + deadline);

    let decision = match Evaluator::new().evaluate(&token, &set, &ctx) {
        Ok(decision) => decision,
        Err(Interrupted::DeadlineExceeded) | Err(Interrupted::Cancelled) => {
            warn!(issuer = %token.issuer, "Dry-run evaluation exceeded its deadline");
            Decision::denied_without_context(
                DenialReason::Timeout,
                set.revision(),
                token.issuer.clone(),
                token.subject.clone(),
                ctx.now,
            )
        }
    };

    let (_, response) = EvaluateResponse::from_decision(&decision);
    print_json(&response)?;
    Ok(decision_exit_code(&decision))
}

// =============================================================================
// serve
// =============================================================================

async fn cmd_serve(config_path: &Path) -> Result<u8, PlaneError> {
    let config = load_config(config_path)?;

    let sink = Arc::new(FileAuditSink::open(&config.audit.path).await?);
    let store = Arc::new(FileSnapshotStore::new(&config.state.dir));
    let bridge = TokenBridgeBuilder::new()
        .with_handler(JwtHandler::new())
        .build();

    let gateway = Gateway::start(&config, sink, store, bridge).await?;

    let (credential, secret) =
        BootstrapCredential::mint(BootstrapScope::Reload, config.server.bootstrap_ttl());
    // Printed once to stdout for the operator; never logged
    println!(
        "bootstrap credential (scope: {}, expires: {}): {}",
        credential.scope, credential.expires_at, secret
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    info!(
        addr = %addr,
        revision = gateway.revision(),
        bindings = gateway.snapshot().len(),
        audit = %config.audit.path.display(),
        "Starting trustbind server"
    );

    let state = Arc::new(AppState {
        gateway,
        bootstrap: Some(credential),
        config_path: Some(config_path.to_path_buf()),
        default_deadline: config.server.deadline(),
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "trustbind listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("trustbind stopped");
    Ok(EXIT_OK)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

// =============================================================================
// diff
// =============================================================================

/// Drift report printed by `diff`
#[derive(Debug, Serialize)]
pub struct DriftReport {
    pub persisted_revision: Option<u64>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

async fn cmd_diff(config_path: &Path, state_dir: Option<PathBuf>) -> Result<u8, PlaneError> {
    let config = load_config(config_path)?;
    let store = FileSnapshotStore::new(state_dir.unwrap_or_else(|| config.state.dir.clone()));

    let persisted = store.load().await?;
    let compiled = config
        .domain()?
        .compile_at(persisted.as_ref().map_or(1, |p| p.revision))?;

    let report = match &persisted {
        Some(p) => {
            let drift = p.diff(&compiled);
            DriftReport {
                persisted_revision: Some(p.revision),
                added: drift.added,
                removed: drift.removed,
                changed: drift.changed,
            }
        }
        None => DriftReport {
            persisted_revision: None,
            added: compiled.iter().map(|b| b.key.clone()).collect(),
            removed: Vec::new(),
            changed: Vec::new(),
        },
    };
    print_json(&report)?;

    let drifted = !(report.added.is_empty() && report.removed.is_empty() && report.changed.is_empty());
    Ok(if drifted { EXIT_DRIFT } else { EXIT_OK })
}

// =============================================================================
// verify-audit
// =============================================================================

#[derive(Debug, Serialize)]
struct AuditReport {
    records: usize,
    head: Option<String>,
    intact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    broken_at: Option<String>,
}

async fn cmd_verify_audit(config_path: &Path, path: Option<PathBuf>) -> Result<u8, PlaneError> {
    let path = match path {
        Some(path) => path,
        None => load_config(config_path)?.audit.path,
    };

    let records = match read_records(&path).await {
        Ok(records) => records,
        Err(AuditError::CorruptLine { line, source }) => {
            warn!(
                path = %path.display(),
                line,
                error = %source,
                "SECURITY: audit file has a corrupt line"
            );
            print_json(&AuditReport {
                records: 0,
                head: None,
                intact: false,
                broken_at: Some(format!("line {}", line)),
            })?;
            return Ok(EXIT_AUDIT_BROKEN);
        }
        Err(e) => return Err(e.into()),
    };
    let head = records.last().map(|r| r.hash.clone());

    match verify_chain(&records) {
        Ok(()) => {
            print_json(&AuditReport {
                records: records.len(),
                head,
                intact: true,
                broken_at: None,
            })?;
            Ok(EXIT_OK)
        }
        Err(AuditError::ChainBroken { sequence }) => {
            warn!(path = %path.display(), sequence, "SECURITY: audit chain broken");
            print_json(&AuditReport {
                records: records.len(),
                head,
                intact: false,
                broken_at: Some(format!("sequence {}", sequence)),
            })?;
            Ok(EXIT_AUDIT_BROKEN)
        }
        Err(e) => Err(e.into()),
    }
}
