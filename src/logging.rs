//! # Structured Logging Module
//!
//! Console logging for every process, plus an optional JSON log file for
//! post-mortem analysis of long batches. Components never pick their own
//! levels: the process chooses a [`Verbosity`] once and passes it down.

use std::fmt;
use std::fs;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{ConfigManager, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// How much a process reports about its work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Warnings and errors only
    Quiet,
    /// Lifecycle and per-job progress
    #[default]
    Normal,
    /// Per-attempt and per-transition detail
    Verbose,
}

impl Verbosity {
    /// Default filter directive for this verbosity
    pub fn level(&self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }

    /// Resolve the `-q` / `-v` command-line flags; quiet wins when both are set
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }

    /// Whether per-job progress lines should be emitted at info level
    pub fn reports_progress(&self) -> bool {
        !matches!(self, Self::Quiet)
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quiet => write!(f, "quiet"),
            Self::Normal => write!(f, "normal"),
            Self::Verbose => write!(f, "verbose"),
        }
    }
}

/// Initialize structured logging once per process
///
/// `RUST_LOG` overrides the verbosity-derived level. When a global subscriber
/// is already installed (tests, embedding applications) the existing one is
/// kept.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let level = config.verbosity.level();
        let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let console_layer = tracing_fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(console_filter);

        let mut log_file = None;
        let file_layer = config.log_dir.as_ref().and_then(|log_dir| {
            if let Err(e) = fs::create_dir_all(log_dir) {
                eprintln!("Failed to create log directory {}: {e}", log_dir.display());
                return None;
            }

            let environment = ConfigManager::detect_environment();
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let file_name = format!("{environment}.{}.{timestamp}.log", process::id());
            log_file = Some(log_dir.join(&file_name));

            let appender = tracing_appender::rolling::never(log_dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The writer must outlive every span in the process
            std::mem::forget(guard);

            let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
            Some(
                tracing_fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(file_filter),
            )
        });

        let subscriber = tracing_subscriber::registry().with(console_layer).with(file_layer);
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::debug!(
            pid = process::id(),
            verbosity = %config.verbosity,
            log_file = ?log_file,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log structured data for job lifecycle operations
pub fn log_job_operation(operation: &str, job_id: &str, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for a single step of a job
pub fn log_step_operation(
    operation: &str,
    job_id: &str,
    step: &str,
    attempt: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        job_id = %job_id,
        step = %step,
        attempt = attempt,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
