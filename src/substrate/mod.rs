//! # Durable-Execution Substrate
//!
//! The boundary between the driver, which submits jobs and waits for their
//! results, and the worker pool, which claims and runs them.
//!
//! - [`WorkflowClient`]: driver side (`start`, `result`, `cancel`)
//! - [`TaskQueue`]: worker side (`claim`, `heartbeat`, `complete`, `release`)
//!
//! Submission is idempotent on the idempotency key: starting the same key
//! twice yields the same workflow. A claim that stops heartbeating is handed
//! to another worker, which is how a crashed worker's job gets re-delivered.
//!
//! [`SpoolDirectory`] implements both traits on a shared directory so the
//! driver and workers can cooperate on one machine.

pub mod spool;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{JobDescriptor, JobResult};

pub use spool::SpoolDirectory;

/// Request to start one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStart {
    pub workflow_type: String,
    /// Deduplicates submissions; the job id
    pub idempotency_key: String,
    pub task_queue: String,
    pub job: JobDescriptor,
}

/// Reference to a started workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub task_queue: String,
}

/// A job a worker has taken ownership of
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    pub worker_id: String,
    pub job: JobDescriptor,
    /// 1 on first delivery, higher after re-delivery
    pub delivery: u32,
}

#[async_trait::async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Submit a workflow; a duplicate idempotency key returns the existing handle
    async fn start(&self, request: WorkflowStart) -> Result<WorkflowHandle>;

    /// Wait until the workflow has produced its result
    async fn result(&self, handle: &WorkflowHandle) -> Result<JobResult>;

    /// Ask for the workflow to be cancelled; its result still arrives via `result`
    async fn cancel(&self, handle: &WorkflowHandle) -> Result<()>;
}

#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync {
    /// Take the oldest pending job of `task_queue`, if any
    async fn claim(&self, task_queue: &str, worker_id: &str) -> Result<Option<ClaimedJob>>;

    /// Prove the claim is still being worked on
    async fn heartbeat(&self, claim: &ClaimedJob) -> Result<()>;

    /// Publish the result and drop the claim
    async fn complete(&self, claim: &ClaimedJob, result: &JobResult) -> Result<()>;

    /// Give the job back so another worker runs it
    async fn release(&self, claim: &ClaimedJob) -> Result<()>;

    async fn is_cancel_requested(&self, claim: &ClaimedJob) -> Result<bool>;

    /// Return claims whose last heartbeat is older than `lease` to pending;
    /// returns how many were requeued
    async fn requeue_expired(&self, lease: Duration) -> Result<usize>;
}
