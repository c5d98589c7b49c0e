#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conveyor Core
//!
//! Batch artifact pipeline orchestrator: fetch an artifact, transform it
//! through an external service, store the result and discard intermediate
//! state, for every job of a batch, with bounded parallelism.
//!
//! ## Architecture
//!
//! - **StepExecutor**: one step under a timeout and a retry policy, with
//!   cancellation observed before, during and between attempts
//! - **JobWorkflow**: `fetch → transform → store` for one job; every artifact
//!   it creates is registered and cleaned up on every exit path
//! - **BatchDispatcher**: FIFO admission of a batch under a concurrency
//!   limit, exactly one result per job, and a batch summary
//! - **WorkerSupervisor**: a fixed-size pool of worker processes with
//!   per-worker log sinks, crash detection and immediate restart
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration (`config` crate, TOML + environment)
//! - [`error`] - Crate, step and terminal error types
//! - [`models`] - Descriptors, artifact handles, results and batch input
//! - [`state_machine`] - Job and worker-slot states
//! - [`resilience`] - Retry policies
//! - [`execution`] - The step executor
//! - [`orchestration`] - Job workflow, batch dispatcher and job runners
//! - [`substrate`] - Durable-execution substrate traits and the spool directory
//! - [`adapters`] - Local storage and command transformation adapters
//! - [`supervisor`] - Worker pool supervision and log sinks
//! - [`worker`] - The claim/run/publish loop of a worker process
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conveyor_core::adapters::LocalSteps;
//! use conveyor_core::config::ConfigManager;
//! use conveyor_core::models::{BatchDefaults, BatchInput};
//! use conveyor_core::orchestration::{BatchDispatcher, LocalJobRunner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let steps = Arc::new(LocalSteps::from_config(&config.storage, &config.transform));
//! let runner = LocalJobRunner::new(
//!     steps,
//!     config.steps.to_workflow_settings()?,
//!     config.batch.default_instruction.clone(),
//! );
//! let dispatcher = BatchDispatcher::new(Arc::new(runner), config.logging.verbosity);
//!
//! let jobs = BatchInput::parse("a.jpg,b.png", &BatchDefaults::from_config(&config.batch))?;
//! let report = dispatcher.run_batch(jobs, config.batch.max_concurrent_jobs).await?;
//! println!("{} of {} succeeded", report.summary.succeeded, report.summary.total);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod state_machine;
pub mod substrate;
pub mod supervisor;
pub mod worker;

pub use config::{ConfigManager, ConveyorConfig};
pub use error::{ConveyorError, ErrorClassification, Result, StepError, TerminalError};
pub use execution::{StepExecutor, StepOutcome};
pub use logging::{init_structured_logging, Verbosity};
pub use models::{
    ArtifactHandle, BatchReport, BatchSummary, JobDescriptor, JobId, JobResult, JobStatus,
    Locator, StepKind,
};
pub use orchestration::{BatchDispatcher, JobRunner, JobWorkflow, StepOperations, WorkflowSettings};
pub use resilience::RetryPolicy;
pub use state_machine::{JobState, SlotState};
pub use supervisor::{SupervisorSettings, WorkerSupervisor};
