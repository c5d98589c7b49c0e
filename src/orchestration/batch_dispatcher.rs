//! # Batch Dispatcher
//!
//! Admits the jobs of a batch in submission order, never more than the
//! concurrency limit at a time, and collects exactly one [`JobResult`] per job.
//!
//! ## Admission
//!
//! A semaphore with `concurrency_limit` permits gates admission. A single
//! loop pops the next queued job only after it holds a permit, so admission
//! is FIFO. The permit travels with the job's task and is released when the
//! job's result is ready.
//!
//! ## Failure isolation
//!
//! Every job runs as its own task. A runner error or a panic becomes a failed
//! result classified `unexpected`; other jobs are unaffected.
//!
//! ## Cancellation
//!
//! [`BatchDispatcher::cancel`] reports every still-queued job as cancelled
//! without running it. In-flight jobs hold a child token: their current step
//! is cancelled and their cleanup still runs.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::JobRunner;
use crate::error::{ConveyorError, Result};
use crate::logging::Verbosity;
use crate::models::{BatchReport, JobDescriptor, JobId, JobResult};

/// Live and peak count of admitted, unfinished jobs
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            gauge: Arc::clone(self),
        }
    }
}

struct InFlightGuard {
    gauge: Arc<InFlightGauge>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct BatchDispatcher {
    runner: Arc<dyn JobRunner>,
    verbosity: Verbosity,
    cancel: CancellationToken,
    gauge: Arc<InFlightGauge>,
}

impl BatchDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, verbosity: Verbosity) -> Self {
        Self {
            runner,
            verbosity,
            cancel: CancellationToken::new(),
            gauge: Arc::new(InFlightGauge::default()),
        }
    }

    /// Token that cancels the batch; clone it into signal handlers
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.current()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak()
    }

    /// Run every job of the batch and wait for all of them
    ///
    /// Fails only when the batch is rejected before any job is admitted.
    pub async fn run_batch(
        &self,
        jobs: Vec<JobDescriptor>,
        concurrency_limit: usize,
    ) -> Result<BatchReport> {
        Self::validate(&jobs, concurrency_limit)?;

        let total = jobs.len();
        let started = Instant::now();
        info!(
            total_jobs = total,
            concurrency_limit = concurrency_limit,
            "🚀 Starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency_limit));
        let mut queue: VecDeque<JobDescriptor> = jobs.into();
        let mut outstanding: HashMap<JobId, JobDescriptor> = HashMap::new();
        let mut tasks: JoinSet<JobResult> = JoinSet::new();
        let mut results: Vec<JobResult> = Vec::with_capacity(total);

        while !queue.is_empty() || !tasks.is_empty() {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if !queue.is_empty() => {
                    warn!(queued = queue.len(), "🛑 Batch cancelled; dropping queued jobs");
                    for job in queue.drain(..) {
                        self.record(&mut results, JobResult::cancelled_before_start(&job), total);
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(result) => {
                            if outstanding.remove(&result.job_id).is_none() {
                                warn!(job_id = %result.job_id, "Result for a job that was not outstanding");
                            }
                            self.record(&mut results, result, total);
                        }
                        // Panics are caught inside the task; this is a runtime abort
                        Err(join_error) => {
                            warn!(error = %join_error, "Job task ended without a result");
                        }
                    }
                }

                permit = Arc::clone(&semaphore).acquire_owned(), if !queue.is_empty() => {
                    let permit = permit.map_err(|e| ConveyorError::Internal(format!("admission gate closed: {e}")))?;
                    if let Some(job) = queue.pop_front() {
                        outstanding.insert(job.id.clone(), job.clone());
                        self.admit(&mut tasks, job, permit);
                    }
                }
            }
        }

        // Whatever is still outstanding lost its result to a task abort
        for (_, job) in outstanding.drain() {
            let result = JobResult::from_fault(&job, "job task ended without a result", started.elapsed());
            self.record(&mut results, result, total);
        }

        let report = BatchReport::new(results, started.elapsed());
        self.log_summary(&report);
        Ok(report)
    }

    fn validate(jobs: &[JobDescriptor], concurrency_limit: usize) -> Result<()> {
        if concurrency_limit < 1 {
            return Err(ConveyorError::ConfigurationError(format!(
                "concurrency limit must be at least 1, got {concurrency_limit}"
            )));
        }
        if jobs.is_empty() {
            return Err(ConveyorError::InvalidBatch(
                "batch contains no jobs".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(jobs.len());
        for job in jobs {
            job.validate()?;
            if !seen.insert(&job.id) {
                return Err(ConveyorError::InvalidBatch(format!(
                    "duplicate job id: {}",
                    job.id
                )));
            }
        }
        Ok(())
    }

    fn admit(&self, tasks: &mut JoinSet<JobResult>, job: JobDescriptor, permit: OwnedSemaphorePermit) {
        let guard = self.gauge.enter();
        let runner = Arc::clone(&self.runner);
        let token = self.cancel.child_token();

        debug!(job_id = %job.id, in_flight = self.gauge.current(), "📥 Job admitted");

        tasks.spawn(async move {
            let started = Instant::now();
            let fault_copy = job.clone();

            let result = match AssertUnwindSafe(runner.run_job(job, token))
                .catch_unwind()
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(error)) => JobResult::from_fault(&fault_copy, error.to_string(), started.elapsed()),
                Err(panic) => JobResult::from_fault(
                    &fault_copy,
                    format!("job runner panicked: {}", panic_message(panic.as_ref())),
                    started.elapsed(),
                ),
            };

            // Leave the gauge before freeing the slot so it never reads above the limit
            drop(guard);
            drop(permit);
            result
        });
    }

    fn record(&self, results: &mut Vec<JobResult>, result: JobResult, total: usize) {
        let job_id = result.job_id.clone();
        let success = result.is_success();
        let message = result
            .failure
            .as_ref()
            .map(|f| format!("[{}] {}", f.classification, f.message));
        let destination = result.destination.as_ref().map(ToString::to_string);
        let source = result.source.to_string();
        results.push(result);

        let completed = results.len();
        let percent = completed as f64 / total as f64 * 100.0;

        if self.verbosity.reports_progress() {
            if success {
                info!(job_id = %job_id, "✅ Completed: {} → {}", source, destination.unwrap_or_default());
            } else {
                warn!(job_id = %job_id, "❌ Failed: {} - {}", source, message.unwrap_or_default());
            }
            info!("📊 Progress: {}/{} ({:.1}%)", completed, total, percent);
        } else {
            if !success {
                warn!(job_id = %job_id, "❌ Failed: {} - {}", source, message.unwrap_or_default());
            }
            debug!("📊 Progress: {}/{} ({:.1}%)", completed, total, percent);
        }
    }

    fn log_summary(&self, report: &BatchReport) {
        let summary = &report.summary;

        if !self.verbosity.reports_progress() {
            if !summary.all_succeeded() {
                warn!(
                    total = summary.total,
                    failed = summary.failed,
                    cancelled = summary.cancelled,
                    "Batch finished with failures"
                );
            }
            return;
        }

        info!("{}", "=".repeat(60));
        info!("BATCH PROCESSING SUMMARY");
        info!("{}", "=".repeat(60));
        info!("Total jobs:        {}", summary.total);
        info!("Successful:        {}", summary.succeeded);
        info!("Failed:            {}", summary.failed);
        if summary.cancelled > 0 {
            info!("Cancelled:         {}", summary.cancelled);
        }
        info!("Total job time:    {:.2}s", summary.total_duration.as_secs_f64());
        info!("Average job time:  {:.2}s", summary.average_duration.as_secs_f64());
        info!("Batch wall clock:  {:.2}s", report.elapsed.as_secs_f64());
        info!("Peak in flight:    {}", self.peak_in_flight());

        if !summary.all_succeeded() {
            info!("Failed jobs:");
            for failed in report.failures() {
                let reason = failed
                    .failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unknown");
                info!("  - {} ({}): {}", failed.job_id, failed.source, reason);
            }
        }
        info!("{}", "=".repeat(60));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Locator;

    fn job(id: &str) -> JobDescriptor {
        JobDescriptor::new(Locator::new("in", format!("{id}.png")), Locator::new("out", format!("{id}.png")))
            .with_id(id)
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            BatchDispatcher::validate(&[job("a")], 0),
            Err(ConveyorError::ConfigurationError(_))
        ));
        assert!(matches!(
            BatchDispatcher::validate(&[], 2),
            Err(ConveyorError::InvalidBatch(_))
        ));
        assert!(matches!(
            BatchDispatcher::validate(&[job("a"), job("a")], 2),
            Err(ConveyorError::InvalidBatch(_))
        ));
        assert!(BatchDispatcher::validate(&[job("a"), job("b")], 1).is_ok());
    }

    #[test]
    fn test_gauge_tracks_peak() {
        let gauge = Arc::new(InFlightGauge::default());
        let first = gauge.enter();
        let second = gauge.enter();
        assert_eq!(gauge.current(), 2);
        drop(first);
        drop(second);
        let _third = gauge.enter();
        assert_eq!(gauge.current(), 1);
        assert_eq!(gauge.peak(), 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
