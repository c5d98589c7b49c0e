//! # Job Workflow
//!
//! Sequences `fetch → transform → store` for one job and guarantees that every
//! artifact the job created is handed to the cleanup step exactly once, on
//! every exit path.
//!
//! ## State flow
//!
//! ```text
//! Fetching → Transforming → Storing → Cleaning → Done
//!     └───────────┴────────────┴──────→ Cleaning → Failed
//! ```
//!
//! A producing step's artifact is registered before the next step starts.
//! Cleanup runs against a token that is never cancelled, so a cancelled job
//! still discards its intermediate state. Cleanup failures are logged and
//! counted but never change the job's status.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::types::StepOperations;
use crate::constants::defaults;
use crate::error::TerminalError;
use crate::execution::{StepExecutor, StepOutcome};
use crate::logging::{log_job_operation, log_step_operation};
use crate::models::{ArtifactHandle, JobDescriptor, JobFailure, JobId, JobResult, StepKind};
use crate::resilience::RetryPolicy;
use crate::state_machine::JobState;

/// Timeout and retry policy for one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl StepSettings {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

/// Settings for every step of a job
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub fetch: StepSettings,
    pub transform: StepSettings,
    pub store: StepSettings,
    pub cleanup: StepSettings,
}

impl WorkflowSettings {
    /// Settings the workflow applies to `step`
    pub fn for_step(&self, step: StepKind) -> &StepSettings {
        match step {
            StepKind::Fetch => &self.fetch,
            StepKind::Transform => &self.transform,
            StepKind::Store => &self.store,
            StepKind::Cleanup => &self.cleanup,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            fetch: StepSettings::new(Duration::from_millis(defaults::FETCH_TIMEOUT_MS), retry),
            transform: StepSettings::new(
                Duration::from_millis(defaults::TRANSFORM_TIMEOUT_MS),
                retry,
            ),
            store: StepSettings::new(Duration::from_millis(defaults::STORE_TIMEOUT_MS), retry),
            cleanup: StepSettings::new(
                Duration::from_millis(defaults::CLEANUP_TIMEOUT_MS),
                RetryPolicy::no_retry(),
            ),
        }
    }
}

/// Owns every artifact handle a job has produced until cleanup drains it
#[derive(Debug)]
pub struct ArtifactRegistry {
    job_id: JobId,
    handles: Vec<ArtifactHandle>,
}

impl ArtifactRegistry {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            handles: Vec::new(),
        }
    }

    /// Take ownership of a handle; the returned reference can feed the next step
    pub fn register(&mut self, handle: ArtifactHandle) -> &ArtifactHandle {
        debug!(job_id = %self.job_id, artifact = %handle, "📎 Artifact registered");
        self.handles.push(handle);
        &self.handles[self.handles.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Remove every handle in registration order
    pub fn drain(&mut self) -> Vec<ArtifactHandle> {
        std::mem::take(&mut self.handles)
    }
}

impl Drop for ArtifactRegistry {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            error!(
                job_id = %self.job_id,
                leaked = self.handles.len(),
                "💧 Artifact registry dropped with handles that were never cleaned up"
            );
        }
    }
}

/// One execution of one job
pub struct JobWorkflow {
    job: JobDescriptor,
    operations: Arc<dyn StepOperations>,
    settings: Arc<WorkflowSettings>,
    default_instruction: String,
    cancel: CancellationToken,
    state: JobState,
    registry: ArtifactRegistry,
}

impl JobWorkflow {
    pub fn new(
        job: JobDescriptor,
        operations: Arc<dyn StepOperations>,
        settings: Arc<WorkflowSettings>,
        default_instruction: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        let registry = ArtifactRegistry::new(job.id.clone());
        Self {
            job,
            operations,
            settings,
            default_instruction: default_instruction.into(),
            cancel,
            state: JobState::default(),
            registry,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Run the job to completion, cleanup included
    pub async fn run(mut self) -> JobResult {
        let span = info_span!("job", job_id = %self.job.id, source = %self.job.source);
        async move {
            let started = Instant::now();
            log_job_operation("run", self.job.id.as_str(), "started", None);

            let outcome = self.run_steps().await;

            Self::advance(&mut self.state, JobState::Cleaning, &self.job.id);
            let cleanup_failures = self.cleanup().await;

            let result = match outcome {
                Ok(()) => {
                    Self::advance(&mut self.state, JobState::Done, &self.job.id);
                    JobResult::succeeded(&self.job, started.elapsed(), cleanup_failures)
                }
                Err(error) => {
                    Self::advance(&mut self.state, JobState::Failed, &self.job.id);
                    JobResult::failed(
                        &self.job,
                        JobFailure::from(&error),
                        started.elapsed(),
                        cleanup_failures,
                    )
                }
            };

            info!(
                status = %result.status,
                duration_ms = result.duration.as_millis() as u64,
                cleanup_failures = cleanup_failures,
                "🏁 Job finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn run_steps(&mut self) -> Result<(), TerminalError> {
        let executor = StepExecutor::new();
        let operations = &self.operations;
        let job = &self.job;
        let cancel = &self.cancel;
        let instruction = job.instruction().unwrap_or(&self.default_instruction);

        // Fetching
        let settings = *self.settings.for_step(StepKind::Fetch);
        let fetched = executor
            .execute(StepKind::Fetch, settings.timeout, &settings.retry, cancel, |_| {
                operations.fetch(job)
            })
            .await
            .into_result()?;
        let fetched = self.registry.register(fetched);
        log_step_operation("fetch", job.id.as_str(), "fetch", None, "succeeded", None);

        // Transforming
        Self::advance(&mut self.state, JobState::Transforming, &job.id);
        let settings = *self.settings.for_step(StepKind::Transform);
        let transformed = executor
            .execute(StepKind::Transform, settings.timeout, &settings.retry, cancel, |_| {
                operations.transform(job, fetched, instruction)
            })
            .await
            .into_result()?;
        let transformed = self.registry.register(transformed);
        log_step_operation("transform", job.id.as_str(), "transform", None, "succeeded", None);

        // Storing
        Self::advance(&mut self.state, JobState::Storing, &job.id);
        let settings = *self.settings.for_step(StepKind::Store);
        executor
            .execute(StepKind::Store, settings.timeout, &settings.retry, cancel, |_| {
                operations.store(job, transformed)
            })
            .await
            .into_result()?;
        log_step_operation(
            "store",
            job.id.as_str(),
            "store",
            None,
            "succeeded",
            Some(&job.destination.to_string()),
        );

        Ok(())
    }

    /// Clean up every registered artifact; returns the number of failures
    async fn cleanup(&mut self) -> u32 {
        let executor = StepExecutor::new();
        let settings = *self.settings.for_step(StepKind::Cleanup);
        // Cleanup must run even when the job itself was cancelled
        let never_cancelled = CancellationToken::new();
        let mut failures = 0;

        for handle in self.registry.drain() {
            let operations = &self.operations;
            let outcome = executor
                .execute(
                    StepKind::Cleanup,
                    settings.timeout,
                    &settings.retry,
                    &never_cancelled,
                    |_| operations.cleanup(&handle),
                )
                .await;

            match outcome {
                StepOutcome::Succeeded(()) => {
                    debug!(artifact = %handle, "🧹 Artifact cleaned up");
                }
                StepOutcome::Failed(error) | StepOutcome::Cancelled(error) => {
                    failures += 1;
                    warn!(artifact = %handle, error = %error, "⚠️ Cleanup failed; continuing");
                }
            }
        }

        failures
    }

    fn advance(state: &mut JobState, next: JobState, job_id: &JobId) {
        match state.transition_to(next) {
            Ok(_) => debug!(job_id = %job_id, from = %state, to = %next, "🔀 Job state transition"),
            Err(e) => error!(job_id = %job_id, error = %e, "Illegal job state transition"),
        }
        *state = next;
    }
}
