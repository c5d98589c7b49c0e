//! # Data Model
//!
//! Descriptors, artifact handles and results exchanged between the dispatcher,
//! the job workflow and the durable-execution substrate.

pub mod artifact;
pub mod batch_input;
pub mod job_descriptor;
pub mod job_result;

pub use artifact::ArtifactHandle;
pub use batch_input::{BatchDefaults, BatchInput};
pub use job_descriptor::{JobDescriptor, JobId, Locator, StepKind, INSTRUCTION_PARAMETER};
pub use job_result::{BatchReport, BatchSummary, JobFailure, JobResult, JobStatus};
