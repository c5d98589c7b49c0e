//! # Conveyor Configuration System
//!
//! Layered configuration for the driver, worker and supervisor processes.
//!
//! ## Architecture
//!
//! - **Defaults first**: every field has a default matching production behavior
//! - **TOML overlays**: `conveyor.toml`, then `conveyor.<environment>.toml`
//! - **Environment last**: `CONVEYOR__SECTION__FIELD` variables win
//! - **Explicit Validation**: invalid policies are rejected before any job runs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conveyor_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let limit = manager.config().batch.max_concurrent_jobs;
//! let settings = manager.config().steps.to_workflow_settings()?;
//! # let _ = (limit, settings);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;
use crate::logging::Verbosity;
use crate::orchestration::job_workflow::{StepSettings, WorkflowSettings};
use crate::resilience::RetryPolicy;
use crate::supervisor::{SinkMode, SupervisorSettings, WorkerCommand};

/// Root configuration structure mirroring `conveyor.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConveyorConfig {
    /// Batch assembly and dispatch settings
    pub batch: BatchConfig,

    /// Per-step timeouts and retry policies
    pub steps: StepsConfig,

    /// Worker pool supervision
    pub supervisor: SupervisorConfig,

    /// Worker process runtime
    pub worker: WorkerConfig,

    /// Local object storage adapter
    pub storage: StorageConfig,

    /// Transformation command adapter
    pub transform: TransformConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl ConveyorConfig {
    /// Validate the whole configuration tree
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch.max_concurrent_jobs < 1 {
            return Err(ConfigurationError::invalid_value(
                "batch.max_concurrent_jobs",
                self.batch.max_concurrent_jobs.to_string(),
                "must be at least 1",
            ));
        }

        self.steps.to_workflow_settings()?;

        if self.supervisor.pool_size < 1 {
            return Err(ConfigurationError::invalid_value(
                "supervisor.pool_size",
                self.supervisor.pool_size.to_string(),
                "must be at least 1",
            ));
        }
        if self.supervisor.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "supervisor.poll_interval_ms",
                "0",
                "must be positive",
            ));
        }
        if self.supervisor.worker_program.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "worker_program",
                "supervisor",
            ));
        }

        if self.worker.poll_interval_ms == 0 || self.worker.result_poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.poll_interval_ms",
                "0",
                "polling intervals must be positive",
            ));
        }
        if self.worker.task_queue.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "task_queue",
                "worker",
            ));
        }

        if self.transform.command.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "command",
                "transform",
            ));
        }

        Ok(())
    }
}

/// How the driver runs admitted jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Run each JobWorkflow inside the driver process
    #[default]
    Local,
    /// Submit to the spool substrate and wait for the worker pool
    Spool,
}

/// Batch assembly and dispatch configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_concurrent_jobs: usize,
    pub dispatch_mode: DispatchMode,
    /// Raw batch input: a JSON array or a comma-separated list of source keys
    pub input: Option<String>,
    pub source_bucket: String,
    pub destination_bucket: String,
    /// Prepended to the basename of a source key to build its destination key
    pub destination_prefix: String,
    pub default_instruction: String,
    /// One job run when `input` is absent or blank
    pub single: SingleJobConfig,
}

/// A single job named field by field
///
/// Only `source_key` is required; the buckets default to the batch buckets
/// and the destination key follows the destination prefix convention.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SingleJobConfig {
    pub source_bucket: Option<String>,
    pub source_key: Option<String>,
    pub destination_bucket: Option<String>,
    pub destination_key: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: defaults::MAX_CONCURRENT_JOBS,
            dispatch_mode: DispatchMode::Local,
            input: None,
            source_bucket: "source-bucket".to_string(),
            destination_bucket: "dest-bucket".to_string(),
            destination_prefix: defaults::DESTINATION_PREFIX.to_string(),
            default_instruction: defaults::INSTRUCTION.to_string(),
            single: SingleJobConfig::default(),
        }
    }
}

/// Retry policy as written in configuration files
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_ms: u64,
    pub maximum_attempts: u32,
    pub jitter: bool,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: defaults::RETRY_INITIAL_INTERVAL_MS,
            backoff_coefficient: defaults::RETRY_BACKOFF_COEFFICIENT,
            maximum_interval_ms: defaults::RETRY_MAXIMUM_INTERVAL_MS,
            maximum_attempts: defaults::RETRY_MAXIMUM_ATTEMPTS,
            jitter: false,
        }
    }
}

impl RetryPolicyConfig {
    /// Single attempt, used for cleanup
    pub fn no_retry() -> Self {
        Self {
            maximum_attempts: 1,
            ..Self::default()
        }
    }

    pub fn to_policy(&self, step: &str) -> ConfigResult<RetryPolicy> {
        RetryPolicy::new(
            Duration::from_millis(self.initial_interval_ms),
            self.backoff_coefficient,
            Duration::from_millis(self.maximum_interval_ms),
            self.maximum_attempts,
        )
        .map(|policy| policy.with_jitter(self.jitter))
        .map_err(|e| {
            ConfigurationError::invalid_value(
                format!("steps.{step}.retry"),
                format!("{self:?}"),
                e.to_string(),
            )
        })
    }
}

/// Timeout and retry policy for one step
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StepConfig {
    pub timeout_ms: u64,
    pub retry: RetryPolicyConfig,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::FETCH_TIMEOUT_MS,
            retry: RetryPolicyConfig::default(),
        }
    }
}

impl StepConfig {
    fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }

    pub fn to_settings(&self, step: &str) -> ConfigResult<StepSettings> {
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("steps.{step}.timeout_ms"),
                "0",
                "step timeout must be positive",
            ));
        }
        Ok(StepSettings::new(
            Duration::from_millis(self.timeout_ms),
            self.retry.to_policy(step)?,
        ))
    }
}

/// Per-step configuration for the job workflow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StepsConfig {
    pub fetch: StepConfig,
    pub transform: StepConfig,
    pub store: StepConfig,
    pub cleanup: StepConfig,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            fetch: StepConfig::with_timeout(defaults::FETCH_TIMEOUT_MS),
            transform: StepConfig::with_timeout(defaults::TRANSFORM_TIMEOUT_MS),
            store: StepConfig::with_timeout(defaults::STORE_TIMEOUT_MS),
            cleanup: StepConfig {
                timeout_ms: defaults::CLEANUP_TIMEOUT_MS,
                retry: RetryPolicyConfig::no_retry(),
            },
        }
    }
}

impl StepsConfig {
    pub fn to_workflow_settings(&self) -> ConfigResult<WorkflowSettings> {
        Ok(WorkflowSettings {
            fetch: self.fetch.to_settings("fetch")?,
            transform: self.transform.to_settings("transform")?,
            store: self.store.to_settings("store")?,
            cleanup: self.cleanup.to_settings("cleanup")?,
        })
    }
}

/// Worker pool supervision configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub pool_size: usize,
    pub stagger_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub grace_period_ms: u64,
    /// A worker that dies sooner than this after starting is reported as crash-looping
    pub crash_loop_window_ms: u64,
    pub log_dir: PathBuf,
    /// Mirror worker output to the console with a per-worker prefix
    pub tee_to_console: bool,
    pub worker_program: String,
    pub worker_args: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            pool_size: defaults::POOL_SIZE,
            stagger_interval_ms: defaults::STAGGER_INTERVAL_MS,
            poll_interval_ms: defaults::SUPERVISOR_POLL_INTERVAL_MS,
            grace_period_ms: defaults::GRACE_PERIOD_MS,
            crash_loop_window_ms: defaults::CRASH_LOOP_WINDOW_MS,
            log_dir: PathBuf::from("logs"),
            tee_to_console: false,
            worker_program: "conveyor-worker".to_string(),
            worker_args: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    pub fn to_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            pool_size: self.pool_size,
            stagger_interval: Duration::from_millis(self.stagger_interval_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
            crash_loop_window: Duration::from_millis(self.crash_loop_window_ms),
            log_dir: self.log_dir.clone(),
            sink_mode: if self.tee_to_console {
                SinkMode::FileAndConsole
            } else {
                SinkMode::FileOnly
            },
            command: WorkerCommand::new(&self.worker_program).args(self.worker_args.clone()),
        }
    }
}

/// Worker process runtime configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Shared directory used as the local durable-execution substrate
    pub spool_dir: PathBuf,
    pub task_queue: String,
    pub poll_interval_ms: u64,
    /// A claim not heartbeated for this long is handed to another worker
    pub claim_lease_ms: u64,
    /// How often the driver checks for a submitted job's result
    pub result_poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from("spool"),
            task_queue: defaults::TASK_QUEUE.to_string(),
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            claim_lease_ms: defaults::CLAIM_LEASE_MS,
            result_poll_interval_ms: defaults::RESULT_POLL_INTERVAL_MS,
        }
    }
}

/// Local filesystem storage adapter configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Buckets are directories below this root
    pub root: PathBuf,
    /// Where staged artifacts live; the system temp directory when unset
    pub staging_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            staging_dir: None,
        }
    }
}

/// Transformation command adapter configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Program and arguments; `{input}`, `{output}` and `{instruction}` are substituted
    pub command: Vec<String>,
    pub output_extension: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "cp".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
            output_extension: "png".to_string(),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbosity: Verbosity,
    /// When set, a JSON log file is written here in addition to the console
    pub log_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConveyorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_step_policies() {
        let settings = StepsConfig::default().to_workflow_settings().unwrap();

        assert_eq!(settings.fetch.timeout, Duration::from_secs(300));
        assert_eq!(settings.transform.timeout, Duration::from_secs(600));
        assert_eq!(settings.store.timeout, Duration::from_secs(300));
        assert_eq!(settings.cleanup.timeout, Duration::from_secs(60));

        assert_eq!(settings.transform.retry.maximum_attempts(), 3);
        assert_eq!(settings.cleanup.retry.maximum_attempts(), 1);
    }

    #[test]
    fn test_invalid_retry_policy_rejected() {
        let mut config = ConveyorConfig::default();
        config.steps.transform.retry.maximum_attempts = 0;

        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("steps.transform.retry"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = ConveyorConfig::default();
        config.batch.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supervisor_settings_conversion() {
        let config = SupervisorConfig {
            tee_to_console: true,
            worker_args: vec!["--quiet".to_string()],
            ..SupervisorConfig::default()
        };

        let settings = config.to_settings();
        assert_eq!(settings.pool_size, 4);
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.grace_period, Duration::from_secs(5));
        assert_eq!(settings.sink_mode, SinkMode::FileAndConsole);
        assert_eq!(settings.command.arguments(), ["--quiet".to_string()]);
    }
}
