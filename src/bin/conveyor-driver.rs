//! # Conveyor Driver
//!
//! Runs one batch of artifact pipeline jobs with bounded parallelism and
//! exits with the batch outcome.
//!
//! ## Usage
//!
//! ```bash
//! # Comma-delimited source keys, default buckets
//! conveyor-driver --images "photos/a.jpg,photos/b.png" --max-concurrent 2
//!
//! # Structured descriptors, handed to the worker pool through the spool
//! conveyor-driver --mode spool --images '[{"source": {...}, "destination": {...}}]'
//!
//! # One job, named field by field
//! conveyor-driver --source-bucket in --source-key funny.png --dest-key enhanced_funny.png
//! ```
//!
//! Without `--images` or `batch.input` the driver runs the single job from
//! `[batch.single]` or the locator flags.
//!
//! Exit status is 0 when every job succeeded, otherwise the number of failed
//! jobs (capped at 255), or 78 when the configuration or the batch input was
//! rejected before any job ran.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};

use conveyor_core::adapters::LocalSteps;
use conveyor_core::config::{ConfigManager, ConfigurationError, ConveyorConfig, DispatchMode};
use conveyor_core::constants::exit_codes;
use conveyor_core::logging::{init_structured_logging, Verbosity};
use conveyor_core::models::{BatchDefaults, BatchInput};
use conveyor_core::orchestration::{BatchDispatcher, JobRunner, LocalJobRunner, SubmittingJobRunner};
use conveyor_core::substrate::SpoolDirectory;
use conveyor_core::ConveyorError;

#[derive(Parser, Debug)]
#[command(name = "conveyor-driver")]
#[command(about = "Run a batch of fetch/transform/store jobs with bounded parallelism")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Comma-delimited source keys, or a JSON array of job descriptors
    #[arg(short, long)]
    images: Option<String>,

    /// Maximum number of jobs in flight at once
    #[arg(short = 'n', long)]
    max_concurrent: Option<usize>,

    /// Run only this source key as a single job
    #[arg(long, conflicts_with = "images")]
    source_key: Option<String>,

    /// Bucket of the single job's source
    #[arg(long)]
    source_bucket: Option<String>,

    /// Bucket of the single job's destination
    #[arg(long)]
    dest_bucket: Option<String>,

    /// Destination key of the single job
    #[arg(long)]
    dest_key: Option<String>,

    /// Transformation instruction for jobs that do not carry their own
    #[arg(long)]
    instruction: Option<String>,

    /// Run jobs in-process or hand them to the worker pool
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Only report warnings and the final summary
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Report per-step detail
    #[arg(short, long)]
    verbose: bool,

    /// Configuration directory (defaults to CONVEYOR_CONFIG_DIR or ./config)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Local,
    Spool,
}

impl From<ModeArg> for DispatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Local => DispatchMode::Local,
            ModeArg::Spool => DispatchMode::Spool,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "❌ Batch aborted");
            eprintln!("❌ {e:#}");
            if is_configuration_error(&e) {
                ExitCode::from(exit_codes::CONFIGURATION_ERROR)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let manager = ConfigManager::load_from_directory(cli.config_dir.clone())?;
    let config = apply_overrides(manager.config().clone(), &cli)?;

    init_structured_logging(&config.logging);

    info!("🚀 Starting Conveyor driver");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());
    info!("   Dispatch mode: {:?}", config.batch.dispatch_mode);

    // An explicit source key always means the single job
    let input = if cli.source_key.is_some() {
        None
    } else {
        cli.images.clone().or_else(|| config.batch.input.clone())
    };

    let defaults = BatchDefaults::from_config(&config.batch).with_instruction(cli.instruction.clone());
    let jobs = BatchInput::resolve(input.as_deref(), &config.batch.single, &defaults)?;
    if input.is_none() {
        info!(jobs = jobs.len(), "📄 Running the single configured job");
    }

    let runner = build_runner(&config).await?;
    let dispatcher = BatchDispatcher::new(runner, config.logging.verbosity);

    let cancel = dispatcher.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("🛑 Shutdown signal received, cancelling batch");
        cancel.cancel();
    });

    let report = dispatcher
        .run_batch(jobs, config.batch.max_concurrent_jobs)
        .await?;

    for failure in report.failures() {
        if let Some(details) = &failure.failure {
            warn!(
                job_id = %failure.job_id,
                classification = %details.classification,
                message = %details.message,
                "Job failed"
            );
        }
    }

    Ok(report.summary.exit_code())
}

fn apply_overrides(mut config: ConveyorConfig, cli: &Cli) -> Result<ConveyorConfig, ConfigurationError> {
    if let Some(limit) = cli.max_concurrent {
        config.batch.max_concurrent_jobs = limit;
    }
    if let Some(mode) = cli.mode {
        config.batch.dispatch_mode = mode.into();
    }
    let single = &mut config.batch.single;
    for (flag, field) in [
        (&cli.source_bucket, &mut single.source_bucket),
        (&cli.source_key, &mut single.source_key),
        (&cli.dest_bucket, &mut single.destination_bucket),
        (&cli.dest_key, &mut single.destination_key),
    ] {
        if flag.is_some() {
            field.clone_from(flag);
        }
    }
    if cli.quiet || cli.verbose {
        config.logging.verbosity = Verbosity::from_flags(cli.quiet, cli.verbose);
    }
    config.validate()?;
    Ok(config)
}

async fn build_runner(config: &ConveyorConfig) -> Result<Arc<dyn JobRunner>> {
    let runner: Arc<dyn JobRunner> = match config.batch.dispatch_mode {
        DispatchMode::Local => {
            let steps = Arc::new(LocalSteps::from_config(&config.storage, &config.transform));
            Arc::new(LocalJobRunner::new(
                steps,
                config.steps.to_workflow_settings()?,
                config.batch.default_instruction.clone(),
            ))
        }
        DispatchMode::Spool => {
            let spool = SpoolDirectory::open(
                &config.worker.spool_dir,
                Duration::from_millis(config.worker.result_poll_interval_ms),
            )
            .await?;
            info!(spool_dir = %spool.root().display(), "📤 Submitting jobs to worker pool");
            Arc::new(SubmittingJobRunner::new(
                Arc::new(spool),
                config.worker.task_queue.clone(),
            ))
        }
    };
    Ok(runner)
}

fn is_configuration_error(error: &anyhow::Error) -> bool {
    error.downcast_ref::<ConfigurationError>().is_some()
        || error
            .downcast_ref::<ConveyorError>()
            .is_some_and(ConveyorError::is_configuration)
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
