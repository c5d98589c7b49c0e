//! # Conveyor Worker
//!
//! One worker process of the pool: claims jobs from the spool directory, runs
//! each through the job workflow with the local storage and transform
//! adapters, and publishes the results. Usually launched by
//! `conveyor-supervisor`, which sets `CONVEYOR_WORKER_SLOT`.
//!
//! ## Usage
//!
//! ```bash
//! CONVEYOR_ENV=production conveyor-worker --config-dir /etc/conveyor
//! ```

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conveyor_core::adapters::LocalSteps;
use conveyor_core::config::ConfigManager;
use conveyor_core::logging::{init_structured_logging, Verbosity};
use conveyor_core::substrate::SpoolDirectory;
use conveyor_core::supervisor::WORKER_SLOT_ENV;
use conveyor_core::worker::{WorkerRuntime, WorkerRuntimeSettings};

#[derive(Parser, Debug)]
#[command(name = "conveyor-worker")]
#[command(about = "Claim and run artifact pipeline jobs from the spool directory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Worker identity (defaults to the supervisor slot plus process id)
    #[arg(long)]
    worker_id: Option<String>,

    /// Task queue to poll instead of the configured one
    #[arg(long)]
    task_queue: Option<String>,

    /// Report per-step detail
    #[arg(short, long)]
    verbose: bool,

    /// Configuration directory (defaults to CONVEYOR_CONFIG_DIR or ./config)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load_from_directory(cli.config_dir.clone())?;
    let mut config = manager.config().clone();
    if cli.verbose {
        config.logging.verbosity = Verbosity::Verbose;
    }
    if let Some(queue) = &cli.task_queue {
        config.worker.task_queue = queue.clone();
    }

    init_structured_logging(&config.logging);

    let worker_id = cli.worker_id.clone().unwrap_or_else(default_worker_id);

    info!("🚀 Starting Conveyor worker");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());
    info!("   Worker: {}", worker_id);
    info!("   Task queue: {}", config.worker.task_queue);

    let spool = SpoolDirectory::open(
        &config.worker.spool_dir,
        Duration::from_millis(config.worker.result_poll_interval_ms),
    )
    .await?;
    let steps = LocalSteps::from_config(&config.storage, &config.transform);
    info!("   Staging: {}", steps.staging_dir().display());

    let settings = WorkerRuntimeSettings::from_config(
        &config.worker,
        worker_id,
        config.batch.default_instruction.clone(),
    );
    let mut runtime = WorkerRuntime::new(
        Arc::new(spool),
        Arc::new(steps),
        config.steps.to_workflow_settings()?,
        settings,
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        trigger.cancel();
    });

    let stats = runtime.run(shutdown).await;

    info!(
        completed = stats.completed,
        released = stats.released,
        abandoned = stats.abandoned,
        "👋 Worker shutdown complete"
    );
    Ok(())
}

fn default_worker_id() -> String {
    match env::var(WORKER_SLOT_ENV) {
        Ok(slot) => format!("worker-{slot}-{}", process::id()),
        Err(_) => format!("worker-{}", process::id()),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
