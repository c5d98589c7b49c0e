//! # Worker Runtime
//!
//! The loop inside each worker process: claim a job from the task queue, run
//! it through the [`JobWorkflow`], heartbeat the claim while it runs, and
//! publish the result.
//!
//! - A cancel request for the claimed job cancels its workflow; cleanup
//!   still runs and the cancelled result is published.
//! - On shutdown the in-flight job is cancelled, cleans up, and its claim is
//!   released back to pending so another worker re-runs it.
//! - Queue errors back off exponentially (bounded) and reset on success.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{ErrorClassification, Result};
use crate::models::JobResult;
use crate::orchestration::{JobWorkflow, StepOperations, WorkflowSettings};
use crate::substrate::{ClaimedJob, TaskQueue};

/// Upper bound on the delay between polls after repeated queue errors
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Shortest heartbeat interval, however short the lease
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRuntimeSettings {
    pub worker_id: String,
    pub task_queue: String,
    pub poll_interval: Duration,
    pub claim_lease: Duration,
    pub default_instruction: String,
}

impl WorkerRuntimeSettings {
    pub fn from_config(config: &WorkerConfig, worker_id: impl Into<String>, default_instruction: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_queue: config.task_queue.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            claim_lease: Duration::from_millis(config.claim_lease_ms),
            default_instruction: default_instruction.into(),
        }
    }

    fn heartbeat_interval(&self) -> Duration {
        (self.claim_lease / 3).max(MIN_HEARTBEAT_INTERVAL)
    }

    fn error_backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(16);
        self.poll_interval
            .saturating_mul(1 << exponent)
            .min(MAX_ERROR_BACKOFF)
    }
}

/// What a runtime did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub completed: u32,
    pub released: u32,
    pub abandoned: u32,
}

/// How a claimed job ended from the runtime's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimOutcome {
    Completed,
    Released,
    /// The claim was taken over by another worker
    Abandoned,
}

pub struct WorkerRuntime {
    queue: Arc<dyn TaskQueue>,
    operations: Arc<dyn StepOperations>,
    workflow_settings: Arc<WorkflowSettings>,
    settings: WorkerRuntimeSettings,
    consecutive_errors: u32,
    stats: RuntimeStats,
}

impl WorkerRuntime {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        operations: Arc<dyn StepOperations>,
        workflow_settings: WorkflowSettings,
        settings: WorkerRuntimeSettings,
    ) -> Self {
        Self {
            queue,
            operations,
            workflow_settings: Arc::new(workflow_settings),
            settings,
            consecutive_errors: 0,
            stats: RuntimeStats::default(),
        }
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    /// Poll and run jobs until `shutdown` fires
    pub async fn run(&mut self, shutdown: CancellationToken) -> RuntimeStats {
        info!(
            worker_id = %self.settings.worker_id,
            task_queue = %self.settings.task_queue,
            "👷 Worker started, polling for jobs"
        );

        while !shutdown.is_cancelled() {
            let delay = match self.poll_once(&shutdown).await {
                Ok(true) => {
                    self.consecutive_errors = 0;
                    continue;
                }
                Ok(false) => {
                    self.consecutive_errors = 0;
                    self.settings.poll_interval
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    let backoff = self.settings.error_backoff(self.consecutive_errors);
                    error!(
                        worker_id = %self.settings.worker_id,
                        error = %e,
                        consecutive_errors = self.consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        "Error during poll and process; backing off"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!(
            worker_id = %self.settings.worker_id,
            completed = self.stats.completed,
            released = self.stats.released,
            "👋 Worker received shutdown signal, exiting"
        );
        self.stats
    }

    /// Claim and run at most one job; `Ok(true)` when a job was processed
    pub async fn poll_once(&mut self, shutdown: &CancellationToken) -> Result<bool> {
        let requeued = self.queue.requeue_expired(self.settings.claim_lease).await?;
        if requeued > 0 {
            info!(requeued = requeued, "Requeued jobs from unresponsive workers");
        }

        let Some(claim) = self
            .queue
            .claim(&self.settings.task_queue, &self.settings.worker_id)
            .await?
        else {
            return Ok(false);
        };

        match self.process(&claim, shutdown).await? {
            ClaimOutcome::Completed => self.stats.completed += 1,
            ClaimOutcome::Released => self.stats.released += 1,
            ClaimOutcome::Abandoned => self.stats.abandoned += 1,
        }
        Ok(true)
    }

    async fn process(&self, claim: &ClaimedJob, shutdown: &CancellationToken) -> Result<ClaimOutcome> {
        info!(
            worker_id = %self.settings.worker_id,
            job_id = %claim.job.id,
            delivery = claim.delivery,
            "📥 Processing job"
        );

        let job_cancel = CancellationToken::new();
        let workflow = JobWorkflow::new(
            claim.job.clone(),
            Arc::clone(&self.operations),
            Arc::clone(&self.workflow_settings),
            self.settings.default_instruction.clone(),
            job_cancel.clone(),
        );
        let mut run = Box::pin(workflow.run());

        let mut heartbeat = interval(self.settings.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let mut shutting_down = false;
        let mut claim_lost = false;

        let result: JobResult = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = shutdown.cancelled(), if !shutting_down => {
                    info!(job_id = %claim.job.id, "🛑 Shutdown requested; cancelling in-flight job");
                    shutting_down = true;
                    job_cancel.cancel();
                }
                _ = heartbeat.tick(), if !claim_lost => {
                    if let Err(e) = self.queue.heartbeat(claim).await {
                        warn!(job_id = %claim.job.id, error = %e, "Heartbeat failed; abandoning job");
                        claim_lost = true;
                        job_cancel.cancel();
                        continue;
                    }
                    match self.queue.is_cancel_requested(claim).await {
                        Ok(true) if !job_cancel.is_cancelled() => {
                            info!(job_id = %claim.job.id, "🛑 Cancellation requested for job");
                            job_cancel.cancel();
                        }
                        Ok(_) => {}
                        Err(e) => warn!(job_id = %claim.job.id, error = %e, "Failed to check cancel marker"),
                    }
                }
            }
        };

        if claim_lost {
            return Ok(ClaimOutcome::Abandoned);
        }

        let cancelled = result.classification() == Some(ErrorClassification::Cancelled);
        if shutting_down && cancelled {
            self.queue.release(claim).await?;
            return Ok(ClaimOutcome::Released);
        }

        self.queue.complete(claim, &result).await?;
        debug!(job_id = %claim.job.id, status = %result.status, "Job result published");
        Ok(ClaimOutcome::Completed)
    }
}
