//! # Conveyor Supervisor
//!
//! Keeps a fixed-size pool of `conveyor-worker` processes alive: each worker
//! gets its own log file, and a worker that dies is replaced on the next
//! monitoring pass. Ctrl+C or SIGTERM stops the pool gracefully.
//!
//! ## Usage
//!
//! ```bash
//! # Four workers, output in ./logs
//! conveyor-supervisor
//!
//! # Eight workers, output also mirrored to the console
//! conveyor-supervisor --pool-size 8 --tee
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conveyor_core::config::ConfigManager;
use conveyor_core::logging::{init_structured_logging, Verbosity};
use conveyor_core::supervisor::{SinkMode, WorkerSupervisor};

#[derive(Parser, Debug)]
#[command(name = "conveyor-supervisor")]
#[command(about = "Run and supervise a pool of conveyor worker processes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Number of worker processes
    #[arg(short = 'n', long)]
    pool_size: Option<usize>,

    /// Mirror worker output to the console with a per-worker prefix
    #[arg(long)]
    tee: bool,

    /// Worker executable (defaults to the configured worker program)
    #[arg(long)]
    worker_program: Option<String>,

    /// Directory for per-worker log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Report supervisor detail
    #[arg(short, long)]
    verbose: bool,

    /// Configuration directory, also passed on to every worker
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
    init_structured_logging(&config.logging);

    let mut settings = config.supervisor.to_settings();
    if let Some(pool_size) = cli.pool_size {
        settings.pool_size = pool_size;
    }
    if cli.tee {
        settings.sink_mode = SinkMode::FileAndConsole;
    }
    if let Some(log_dir) = &cli.log_dir {
        settings.log_dir = log_dir.clone();
    }
    if let Some(program) = &cli.worker_program {
        settings.command = settings.command.with_program(program.clone());
    }
    if let Some(config_dir) = &cli.config_dir {
        settings.command = settings
            .command
            .arg("--config-dir")
            .arg(config_dir.to_string_lossy());
    }
    settings.command = settings.command.env("CONVEYOR_ENV", manager.environment());

    info!("🚀 Starting Conveyor supervisor");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());
    info!("   Pool size: {}", settings.pool_size);
    info!("   Worker program: {}", settings.command.program());
    info!("   Log directory: {}", settings.log_dir.display());

    let supervisor = WorkerSupervisor::new(settings);
    supervisor.start().await?;
    info!("   Press Ctrl+C to shutdown gracefully");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    supervisor.monitor(shutdown).await;

    info!("🛑 Shutdown signal received, stopping worker pool...");
    supervisor.stop().await?;
    info!("👋 Supervisor shutdown complete");
    Ok(())
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
