//! # Orchestration Types
//!
//! The seams between the orchestration core and the outside world: the step
//! operations a job workflow drives, and the runner a batch dispatcher hands
//! admitted jobs to.

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StepError};
use crate::models::{ArtifactHandle, JobDescriptor, JobResult};

/// Storage and transformation operations for one job
///
/// Implementations classify their own failures: [`StepError::Transient`] is
/// retried by the step executor, [`StepError::Permanent`] is not. Futures may
/// be dropped mid-flight when an attempt times out or the job is cancelled.
#[async_trait::async_trait]
pub trait StepOperations: Send + Sync {
    /// Download the source artifact into staging
    async fn fetch(&self, job: &JobDescriptor) -> std::result::Result<ArtifactHandle, StepError>;

    /// Produce the transformed artifact from a fetched one
    async fn transform(
        &self,
        job: &JobDescriptor,
        input: &ArtifactHandle,
        instruction: &str,
    ) -> std::result::Result<ArtifactHandle, StepError>;

    /// Upload the transformed artifact to the job's destination
    async fn store(
        &self,
        job: &JobDescriptor,
        artifact: &ArtifactHandle,
    ) -> std::result::Result<(), StepError>;

    /// Discard an artifact; must tolerate an artifact that is already gone
    async fn cleanup(&self, artifact: &ArtifactHandle) -> std::result::Result<(), StepError>;
}

/// Runs one admitted job to completion
///
/// An `Err` means the runner itself faulted (substrate unavailable, lost
/// result); the dispatcher turns it into a failed result classified
/// `unexpected`.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: JobDescriptor, cancel: CancellationToken) -> Result<JobResult>;
}
