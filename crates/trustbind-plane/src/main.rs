//! trustbind binary
//!
//! Compiles trust bindings, dry-runs evaluations and runs the HTTP plane.

use clap::Parser;
use std::env;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use trustbind_plane::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let log_level = env::var("TRUSTBIND_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {}", e);
    }

    cli::run(cli).await
}
