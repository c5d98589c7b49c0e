//! # Job Results and Batch Summary
//!
//! A `JobResult` is created exactly once, when a job's workflow has finished
//! (cleanup included). A `BatchSummary` is derived from the full set of
//! results and does not depend on the order they arrived in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::job_descriptor::{JobDescriptor, JobId, Locator, StepKind};
use crate::constants::exit_codes;
use crate::error::{ErrorClassification, TerminalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub classification: ErrorClassification,
    /// The step that failed; `None` when the job never reached a step
    pub step: Option<StepKind>,
    pub attempts: u32,
    pub message: String,
}

impl From<&TerminalError> for JobFailure {
    fn from(error: &TerminalError) -> Self {
        Self {
            classification: error.classification(),
            step: Some(error.step),
            attempts: error.attempts,
            message: error.to_string(),
        }
    }
}

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub source: Locator,
    /// Where the transformed artifact was stored, on success
    pub destination: Option<Locator>,
    pub failure: Option<JobFailure>,
    pub duration: Duration,
    /// Cleanup attempts that failed; never affects `status`
    #[serde(default)]
    pub cleanup_failures: u32,
}

impl JobResult {
    pub fn succeeded(job: &JobDescriptor, duration: Duration, cleanup_failures: u32) -> Self {
        Self {
            job_id: job.id.clone(),
            status: JobStatus::Succeeded,
            source: job.source.clone(),
            destination: Some(job.destination.clone()),
            failure: None,
            duration,
            cleanup_failures,
        }
    }

    pub fn failed(
        job: &JobDescriptor,
        failure: JobFailure,
        duration: Duration,
        cleanup_failures: u32,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            status: JobStatus::Failed,
            source: job.source.clone(),
            destination: None,
            failure: Some(failure),
            duration,
            cleanup_failures,
        }
    }

    /// A job whose runner faulted outside the step contract (panic, substrate error)
    pub fn from_fault(job: &JobDescriptor, message: impl Into<String>, duration: Duration) -> Self {
        let failure = JobFailure {
            classification: ErrorClassification::Unexpected,
            step: None,
            attempts: 0,
            message: message.into(),
        };
        Self::failed(job, failure, duration, 0)
    }

    /// A queued job removed by batch cancellation before it was admitted
    pub fn cancelled_before_start(job: &JobDescriptor) -> Self {
        let failure = JobFailure {
            classification: ErrorClassification::Cancelled,
            step: None,
            attempts: 0,
            message: "cancelled before start".to_string(),
        };
        Self::failed(job, failure, Duration::ZERO, 0)
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    pub fn classification(&self) -> Option<ErrorClassification> {
        self.failure.as_ref().map(|f| f.classification)
    }
}

/// Aggregate view of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed jobs classified as cancelled (a subset of `failed`)
    pub cancelled: usize,
    /// Sum of per-job durations
    pub total_duration: Duration,
    pub average_duration: Duration,
}

impl BatchSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let cancelled = results
            .iter()
            .filter(|r| r.classification() == Some(ErrorClassification::Cancelled))
            .count();
        let total_duration: Duration = results.iter().map(|r| r.duration).sum();
        let average_duration = u32::try_from(total)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| total_duration / n)
            .unwrap_or(Duration::ZERO);

        Self {
            total,
            succeeded,
            failed: total - succeeded,
            cancelled,
            total_duration,
            average_duration,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code: 0 when everything succeeded, else the failure count capped at 255
    pub fn exit_code(&self) -> u8 {
        if self.failed == 0 {
            exit_codes::SUCCESS
        } else {
            u8::try_from(self.failed).unwrap_or(exit_codes::MAX_FAILURE_CODE)
        }
    }
}

/// Everything a batch run produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Results in completion order
    pub results: Vec<JobResult>,
    pub summary: BatchSummary,
    /// Wall-clock time of the whole batch
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn new(results: Vec<JobResult>, elapsed: Duration) -> Self {
        let summary = BatchSummary::from_results(&results);
        Self {
            results,
            summary,
            elapsed,
        }
    }

    pub fn result_for(&self, job_id: &JobId) -> Option<&JobResult> {
        self.results.iter().find(|r| &r.job_id == job_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}
