//! # Job Runners
//!
//! How the batch dispatcher gets an admitted job executed:
//!
//! - [`LocalJobRunner`] runs the [`JobWorkflow`] inside the driver process.
//! - [`SubmittingJobRunner`] submits the job to the durable-execution
//!   substrate and waits for a worker to publish its result. Cancellation is
//!   forwarded to the substrate and the runner keeps waiting, so the job's
//!   cleanup is still accounted for in its result.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::job_workflow::{JobWorkflow, WorkflowSettings};
use super::types::{JobRunner, StepOperations};
use crate::constants::WORKFLOW_TYPE;
use crate::error::Result;
use crate::models::{JobDescriptor, JobResult};
use crate::substrate::{WorkflowClient, WorkflowStart};

pub struct LocalJobRunner {
    operations: Arc<dyn StepOperations>,
    settings: Arc<WorkflowSettings>,
    default_instruction: String,
}

impl LocalJobRunner {
    pub fn new(
        operations: Arc<dyn StepOperations>,
        settings: WorkflowSettings,
        default_instruction: impl Into<String>,
    ) -> Self {
        Self {
            operations,
            settings: Arc::new(settings),
            default_instruction: default_instruction.into(),
        }
    }
}

#[async_trait::async_trait]
impl JobRunner for LocalJobRunner {
    async fn run_job(&self, job: JobDescriptor, cancel: CancellationToken) -> Result<JobResult> {
        let workflow = JobWorkflow::new(
            job,
            Arc::clone(&self.operations),
            Arc::clone(&self.settings),
            self.default_instruction.clone(),
            cancel,
        );
        Ok(workflow.run().await)
    }
}

pub struct SubmittingJobRunner {
    client: Arc<dyn WorkflowClient>,
    task_queue: String,
}

impl SubmittingJobRunner {
    pub fn new(client: Arc<dyn WorkflowClient>, task_queue: impl Into<String>) -> Self {
        Self {
            client,
            task_queue: task_queue.into(),
        }
    }
}

#[async_trait::async_trait]
impl JobRunner for SubmittingJobRunner {
    async fn run_job(&self, job: JobDescriptor, cancel: CancellationToken) -> Result<JobResult> {
        let job_id = job.id.clone();
        let handle = self
            .client
            .start(WorkflowStart {
                workflow_type: WORKFLOW_TYPE.to_string(),
                idempotency_key: job_id.to_string(),
                task_queue: self.task_queue.clone(),
                job,
            })
            .await?;
        debug!(job_id = %job_id, task_queue = %self.task_queue, "📤 Job submitted to substrate");

        tokio::select! {
            biased;
            result = self.client.result(&handle) => result,
            _ = cancel.cancelled() => {
                info!(job_id = %job_id, "🛑 Forwarding cancellation to substrate");
                self.client.cancel(&handle).await?;
                self.client.result(&handle).await
            }
        }
    }
}
