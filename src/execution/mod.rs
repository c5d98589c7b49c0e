//! # Step Execution
//!
//! Timeout, retry and cancellation handling for a single step of a job.

pub mod step_executor;

pub use step_executor::{StepExecutor, StepOutcome};
