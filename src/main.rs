// =============================================================================
// Meridian Engine — Main Entry Point
// =============================================================================
//
// One invocation runs exactly one decision cycle: an external scheduler
// (cron or similar) calls `meridian run --config <path>` on the trading
// cadence. Outside trading hours the run is a clean no-op with exit code 0.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod approval;
mod challenger;
mod compliance;
mod config;
mod exits;
mod finance;
mod indicators;
mod journal;
mod market_data;
mod memory;
mod pm;
mod portfolio;
mod pre_execution;
mod regime;
mod risk;
mod scout;
mod sectors;
mod shadow;
mod signals;
mod store;
mod types;
mod workflow;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::store::{Database, EventRecord};
use crate::workflow::Workflow;

#[derive(Parser)]
#[command(name = "meridian", about = "Automated intraday equity trading engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one decision cycle against the configured universe.
    Run {
        /// Path to the engine configuration (JSON).
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => run(config).await,
    }
}

async fn run(config_path: PathBuf) -> ExitCode {
    let cfg = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, path = %config_path.display(), "config error — aborting run");
            record_startup_failure(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let mut workflow = match Workflow::new(cfg) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "engine construction failed");
            record_startup_failure(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    match workflow.run().await {
        Ok(()) => {
            info!("run complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

/// Best-effort event row for failures that happen before the workflow owns a
/// store handle.
fn record_startup_failure(message: &str) {
    if let Ok(db) = Database::open("trading.db") {
        let _ = db.log_event(&EventRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: "ERROR".to_string(),
            message: format!("startup failure: {message}"),
            metadata: json!({}),
        });
    }
}
