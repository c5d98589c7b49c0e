//! # Spool Directory Substrate
//!
//! A durable-execution substrate on a shared directory. Every state change is
//! a write-to-temp-then-rename, so readers never observe a partial file.
//!
//! ```text
//! <root>/
//!   pending/<queue>/<name>.json   submitted, not yet claimed
//!   claimed/<name>.json           owned by one worker, heartbeated
//!   results/<name>.json           the job's JobResult
//!   cancel/<name>                 cancellation marker
//!   tmp/                          staging for atomic writes and claims
//! ```
//!
//! `<name>` is a UUID v5 of the workflow id (and `<queue>` of the task queue
//! name), so distinct ids never share a file whatever characters they
//! contain. The real id is stored inside each entry.
//!
//! Claiming renames the pending entry into `tmp/`, where only one worker's
//! rename can succeed, stamps the new owner and heartbeat, and then publishes
//! it under `claimed/`. Lease expiry therefore never sees a claimed entry
//! without a heartbeat. Ownership of a claim is re-checked (worker id and
//! delivery number) on every heartbeat, so a worker whose claim was requeued
//! learns that it lost the job.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ClaimedJob, TaskQueue, WorkflowClient, WorkflowHandle, WorkflowStart};
use crate::error::{ConveyorError, ErrorClassification, Result};
use crate::models::{JobDescriptor, JobFailure, JobResult};

const PENDING_DIR: &str = "pending";
const CLAIMED_DIR: &str = "claimed";
const RESULTS_DIR: &str = "results";
const CANCEL_DIR: &str = "cancel";
const TMP_DIR: &str = "tmp";
/// Prefix of a claim being staged in `tmp/`: `claim-<unix millis>-<uuid>.json`
const CLAIM_STAGING_PREFIX: &str = "claim-";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolEntry {
    workflow_id: String,
    workflow_type: String,
    task_queue: String,
    job: JobDescriptor,
    submitted_at: DateTime<Utc>,
    deliveries: u32,
    worker_id: Option<String>,
    heartbeat_at: Option<DateTime<Utc>>,
}

impl SpoolEntry {
    fn is_owned_by(&self, claim: &ClaimedJob) -> bool {
        self.worker_id.as_deref() == Some(claim.worker_id.as_str())
            && self.deliveries == claim.delivery
    }
}

#[derive(Debug, Clone)]
pub struct SpoolDirectory {
    root: PathBuf,
    result_poll_interval: Duration,
}

impl SpoolDirectory {
    /// Open (and lay out, if needed) a spool rooted at `root`
    pub async fn open(root: impl Into<PathBuf>, result_poll_interval: Duration) -> Result<Self> {
        let root = root.into();
        for dir in [PENDING_DIR, CLAIMED_DIR, RESULTS_DIR, CANCEL_DIR, TMP_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        debug!(root = %root.display(), "📂 Spool directory ready");
        Ok(Self {
            root,
            result_poll_interval,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of jobs waiting in a task queue
    pub async fn pending_count(&self, task_queue: &str) -> Result<usize> {
        Ok(self.pending_files(task_queue).await?.len())
    }

    /// Whether a result has been published for a workflow
    pub async fn has_result(&self, workflow_id: &str) -> Result<bool> {
        Ok(fs::try_exists(self.result_path(workflow_id)).await?)
    }

    fn pending_dir(&self, task_queue: &str) -> PathBuf {
        self.root.join(PENDING_DIR).join(encode_name(task_queue))
    }

    fn pending_path(&self, task_queue: &str, workflow_id: &str) -> PathBuf {
        self.pending_dir(task_queue).join(entry_file_name(workflow_id))
    }

    fn claimed_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(CLAIMED_DIR).join(entry_file_name(workflow_id))
    }

    fn result_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(RESULTS_DIR).join(entry_file_name(workflow_id))
    }

    fn cancel_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(CANCEL_DIR).join(encode_name(workflow_id))
    }

    fn staged_claim_path(&self) -> PathBuf {
        self.root.join(TMP_DIR).join(format!(
            "{CLAIM_STAGING_PREFIX}{}-{}.json",
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        ))
    }

    /// Stamp a staged entry with its new owner and publish it under `claimed/`
    async fn finish_claim(&self, staged: &Path, worker_id: &str) -> Result<Option<ClaimedJob>> {
        let Some(mut entry) = read_entry(staged).await? else {
            return Ok(None);
        };
        entry.deliveries += 1;
        entry.worker_id = Some(worker_id.to_string());
        entry.heartbeat_at = Some(Utc::now());
        self.write_entry(&self.claimed_path(&entry.workflow_id), &entry)
            .await?;
        remove_if_exists(staged).await?;

        debug!(
            workflow_id = %entry.workflow_id,
            worker_id = %worker_id,
            delivery = entry.deliveries,
            "📥 Job claimed"
        );
        Ok(Some(ClaimedJob {
            workflow_id: entry.workflow_id,
            workflow_type: entry.workflow_type,
            task_queue: entry.task_queue,
            worker_id: worker_id.to_string(),
            job: entry.job,
            delivery: entry.deliveries,
        }))
    }

    /// Put claims whose staging outlived `lease` back in pending
    async fn requeue_stale_staging(&self, lease: Duration) -> Result<usize> {
        let mut entries = fs::read_dir(self.root.join(TMP_DIR)).await?;
        let now_ms = Utc::now().timestamp_millis();
        let mut requeued = 0;

        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            let Some(staged_at) = staged_claim_millis(&path) else {
                continue;
            };
            let age = Duration::from_millis(u64::try_from(now_ms - staged_at).unwrap_or(0));
            if age < lease {
                continue;
            }
            let Some(entry) = read_entry(&path).await? else {
                continue;
            };

            if fs::try_exists(self.claimed_path(&entry.workflow_id)).await? {
                // The claimer published it before stalling
                remove_if_exists(&path).await?;
                continue;
            }
            fs::create_dir_all(self.pending_dir(&entry.task_queue)).await?;
            match fs::rename(&path, self.pending_path(&entry.task_queue, &entry.workflow_id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            warn!(workflow_id = %entry.workflow_id, "⏰ Abandoned claim returned to pending");
            requeued += 1;
        }

        Ok(requeued)
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = self.root.join(TMP_DIR).join(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_entry(&self, path: &Path, entry: &SpoolEntry) -> Result<()> {
        self.write_atomic(path, &serde_json::to_vec_pretty(entry)?).await
    }

    async fn write_result(&self, workflow_id: &str, result: &JobResult) -> Result<()> {
        self.write_atomic(&self.result_path(workflow_id), &serde_json::to_vec_pretty(result)?)
            .await
    }

    /// Pending entry files, oldest first
    async fn pending_files(&self, task_queue: &str) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(self.pending_dir(task_queue)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension() != Some(OsStr::new("json")) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((modified, path));
        }
        candidates.sort();
        Ok(candidates.into_iter().map(|(_, path)| path).collect())
    }

    async fn claimed_entry_owned(&self, claim: &ClaimedJob) -> Result<SpoolEntry> {
        match read_entry(&self.claimed_path(&claim.workflow_id)).await? {
            Some(entry) if entry.is_owned_by(claim) => Ok(entry),
            _ => Err(ConveyorError::SubstrateError(format!(
                "claim on {} by {} was lost",
                claim.workflow_id, claim.worker_id
            ))),
        }
    }
}

#[async_trait::async_trait]
impl WorkflowClient for SpoolDirectory {
    async fn start(&self, request: WorkflowStart) -> Result<WorkflowHandle> {
        let workflow_id = request.idempotency_key.clone();
        let handle = WorkflowHandle {
            workflow_id: workflow_id.clone(),
            task_queue: request.task_queue.clone(),
        };

        let pending = self.pending_path(&request.task_queue, &workflow_id);
        for path in [&pending, &self.claimed_path(&workflow_id)] {
            if let Some(existing) = read_entry(path).await? {
                if existing.workflow_id != workflow_id {
                    return Err(ConveyorError::SubstrateError(format!(
                        "spool entry {} belongs to workflow {}, not {workflow_id}",
                        path.display(),
                        existing.workflow_id
                    )));
                }
                debug!(workflow_id = %workflow_id, "Workflow already submitted; reusing it");
                return Ok(handle);
            }
        }
        if self.has_result(&workflow_id).await? {
            debug!(workflow_id = %workflow_id, "Workflow already finished; reusing its result");
            return Ok(handle);
        }

        let entry = SpoolEntry {
            workflow_id: workflow_id.clone(),
            workflow_type: request.workflow_type,
            task_queue: request.task_queue.clone(),
            job: request.job,
            submitted_at: Utc::now(),
            deliveries: 0,
            worker_id: None,
            heartbeat_at: None,
        };

        fs::create_dir_all(self.pending_dir(&request.task_queue)).await?;
        self.write_entry(&pending, &entry).await?;
        debug!(workflow_id = %workflow_id, task_queue = %request.task_queue, "📤 Workflow submitted");
        Ok(handle)
    }

    async fn result(&self, handle: &WorkflowHandle) -> Result<JobResult> {
        let path = self.result_path(&handle.workflow_id);
        loop {
            match fs::read(&path).await {
                Ok(bytes) => return Ok(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tokio::time::sleep(self.result_poll_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn cancel(&self, handle: &WorkflowHandle) -> Result<()> {
        self.write_atomic(&self.cancel_path(&handle.workflow_id), b"")
            .await?;

        // Unclaimed work can be resolved here; claimed work sees the marker
        let pending = self.pending_path(&handle.task_queue, &handle.workflow_id);
        if let Some(entry) = read_entry(&pending).await? {
            match fs::remove_file(&pending).await {
                Ok(()) => {
                    self.write_result(&handle.workflow_id, &JobResult::cancelled_before_start(&entry.job))
                        .await?;
                    info!(workflow_id = %handle.workflow_id, "🛑 Pending workflow cancelled");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskQueue for SpoolDirectory {
    async fn claim(&self, task_queue: &str, worker_id: &str) -> Result<Option<ClaimedJob>> {
        for path in self.pending_files(task_queue).await? {
            let staged = self.staged_claim_path();
            match fs::rename(&path, &staged).await {
                Ok(()) => {}
                // Another worker won the rename
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            if let Some(claim) = self.finish_claim(&staged, worker_id).await? {
                return Ok(Some(claim));
            }
        }
        Ok(None)
    }

    async fn heartbeat(&self, claim: &ClaimedJob) -> Result<()> {
        let mut entry = self.claimed_entry_owned(claim).await?;
        entry.heartbeat_at = Some(Utc::now());
        self.write_entry(&self.claimed_path(&claim.workflow_id), &entry)
            .await
    }

    async fn complete(&self, claim: &ClaimedJob, result: &JobResult) -> Result<()> {
        self.write_result(&claim.workflow_id, result).await?;

        if self.claimed_entry_owned(claim).await.is_ok() {
            remove_if_exists(&self.claimed_path(&claim.workflow_id)).await?;
        }
        remove_if_exists(&self.cancel_path(&claim.workflow_id)).await?;
        debug!(workflow_id = %claim.workflow_id, status = %result.status, "📬 Job result published");
        Ok(())
    }

    async fn release(&self, claim: &ClaimedJob) -> Result<()> {
        let mut entry = self.claimed_entry_owned(claim).await?;
        entry.worker_id = None;
        entry.heartbeat_at = None;

        let claimed = self.claimed_path(&claim.workflow_id);
        self.write_entry(&claimed, &entry).await?;
        fs::create_dir_all(self.pending_dir(&claim.task_queue)).await?;
        fs::rename(&claimed, self.pending_path(&claim.task_queue, &claim.workflow_id))
            .await?;
        info!(workflow_id = %claim.workflow_id, "↩️ Claim released back to pending");
        Ok(())
    }

    async fn is_cancel_requested(&self, claim: &ClaimedJob) -> Result<bool> {
        Ok(fs::try_exists(self.cancel_path(&claim.workflow_id)).await?)
    }

    async fn requeue_expired(&self, lease: Duration) -> Result<usize> {
        let mut requeued = self.requeue_stale_staging(lease).await?;
        let mut entries = fs::read_dir(self.root.join(CLAIMED_DIR)).await?;
        let now = Utc::now();

        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            let Some(entry) = read_entry(&path).await? else {
                continue;
            };

            let last_seen = entry.heartbeat_at.unwrap_or(entry.submitted_at);
            let silent_for = now
                .signed_duration_since(last_seen)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if silent_for < lease {
                continue;
            }

            if fs::try_exists(self.cancel_path(&entry.workflow_id)).await? {
                let failure = JobFailure {
                    classification: ErrorClassification::Cancelled,
                    step: None,
                    attempts: 0,
                    message: "cancelled while its worker was unresponsive".to_string(),
                };
                self.write_result(
                    &entry.workflow_id,
                    &JobResult::failed(&entry.job, failure, Duration::ZERO, 0),
                )
                .await?;
                remove_if_exists(&path).await?;
            } else {
                fs::create_dir_all(self.pending_dir(&entry.task_queue)).await?;
                match fs::rename(&path, self.pending_path(&entry.task_queue, &entry.workflow_id)).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            warn!(
                workflow_id = %entry.workflow_id,
                worker_id = ?entry.worker_id,
                silent_secs = silent_for.as_secs(),
                "⏰ Claim lease expired; job requeued"
            );
            requeued += 1;
        }

        Ok(requeued)
    }
}

async fn read_entry(path: &Path) -> Result<Option<SpoolEntry>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// File-system name for an id; distinct ids always get distinct names
fn encode_name(id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string()
}

fn entry_file_name(workflow_id: &str) -> String {
    format!("{}.json", encode_name(workflow_id))
}

/// Staging time of a `tmp/` file, if it is a claim being staged
fn staged_claim_millis(path: &Path) -> Option<i64> {
    let name = path.file_stem()?.to_str()?;
    let (millis, _) = name.strip_prefix(CLAIM_STAGING_PREFIX)?.split_once('-')?;
    millis.parse().ok()
}
