//! # Orchestration Engine
//!
//! The per-job step sequencing contract and the bounded-concurrency batch
//! dispatcher.
//!
//! ## Core Components
//!
//! - **JobWorkflow**: fetch → transform → store for one job, with cleanup of
//!   every registered artifact on every exit path
//! - **BatchDispatcher**: FIFO admission of a batch under a concurrency limit,
//!   one result per job, and the batch summary
//! - **JobRunner**: the seam between the dispatcher and where a job runs
//!   (in-process or through the durable-execution substrate)
//! - **StepOperations**: the seam between the workflow and storage /
//!   transformation services

pub mod batch_dispatcher;
pub mod job_runner;
pub mod job_workflow;
pub mod types;

pub use batch_dispatcher::{BatchDispatcher, InFlightGauge};
pub use job_runner::{LocalJobRunner, SubmittingJobRunner};
pub use job_workflow::{ArtifactRegistry, JobWorkflow, StepSettings, WorkflowSettings};
pub use types::{JobRunner, StepOperations};
