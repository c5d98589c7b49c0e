//! Shared test doubles for the integration suites

#![allow(dead_code)] // Each test binary uses a different subset

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use conveyor_core::error::StepError;
use conveyor_core::models::{ArtifactHandle, JobDescriptor, JobResult, Locator, StepKind};
use conveyor_core::orchestration::{JobRunner, StepOperations, StepSettings, WorkflowSettings};
use conveyor_core::resilience::RetryPolicy;

/// What one scripted call does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Ok,
    Transient,
    Permanent,
    /// Never completes; only a timeout or cancellation ends it
    Hang,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub step: StepKind,
    pub job: String,
}

/// `StepOperations` whose outcomes are scripted per step, optionally per job
///
/// Scripts are consumed front to back; an exhausted script succeeds. Artifacts
/// are named `<step>:<source key>` so cleanup calls can be matched up.
#[derive(Default)]
pub struct ScriptedSteps {
    scripts: Mutex<HashMap<(StepKind, Option<String>), VecDeque<Scripted>>>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    cleaned: Mutex<Vec<String>>,
    produced: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl ScriptedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every step call takes this long before resolving
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(self, step: StepKind, outcomes: &[Scripted]) -> Self {
        self.scripts
            .lock()
            .insert((step, None), outcomes.iter().copied().collect());
        self
    }

    pub fn script_for(self, source_key: &str, step: StepKind, outcomes: &[Scripted]) -> Self {
        self.scripts.lock().insert(
            (step, Some(source_key.to_string())),
            outcomes.iter().copied().collect(),
        );
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, step: StepKind) -> usize {
        self.calls.lock().iter().filter(|c| c.step == step).count()
    }

    /// Locations handed to cleanup, in call order
    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().clone()
    }

    /// Locations of every artifact produced, in creation order
    pub fn produced(&self) -> Vec<String> {
        self.produced.lock().clone()
    }

    /// Most jobs observed inside a step at the same time
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, step: StepKind, job: &JobDescriptor) -> Scripted {
        let mut scripts = self.scripts.lock();
        let specific = (step, Some(job.source.key.clone()));
        if let Some(queue) = scripts.get_mut(&specific) {
            return queue.pop_front().unwrap_or(Scripted::Ok);
        }
        scripts
            .get_mut(&(step, None))
            .and_then(VecDeque::pop_front)
            .unwrap_or(Scripted::Ok)
    }

    async fn perform(&self, step: StepKind, job: &JobDescriptor) -> Result<(), StepError> {
        self.calls.lock().push(Call {
            step,
            job: job.source.key.clone(),
        });
        let outcome = self.next_outcome(step, job);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match outcome {
            Scripted::Ok => Ok(()),
            Scripted::Transient => Err(StepError::transient(format!("{step} unavailable"))),
            Scripted::Permanent => Err(StepError::permanent(format!("{step} rejected"))),
            Scripted::Hang => std::future::pending().await,
        }
    }

    fn produce(&self, step: StepKind, job: &JobDescriptor) -> ArtifactHandle {
        let location = format!("{step}:{}", job.source.key);
        self.produced.lock().push(location.clone());
        ArtifactHandle::new(step, location)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StepOperations for ScriptedSteps {
    async fn fetch(&self, job: &JobDescriptor) -> Result<ArtifactHandle, StepError> {
        self.perform(StepKind::Fetch, job).await?;
        Ok(self.produce(StepKind::Fetch, job))
    }

    async fn transform(
        &self,
        job: &JobDescriptor,
        _input: &ArtifactHandle,
        _instruction: &str,
    ) -> Result<ArtifactHandle, StepError> {
        self.perform(StepKind::Transform, job).await?;
        Ok(self.produce(StepKind::Transform, job))
    }

    async fn store(&self, job: &JobDescriptor, _artifact: &ArtifactHandle) -> Result<(), StepError> {
        self.perform(StepKind::Store, job).await
    }

    async fn cleanup(&self, artifact: &ArtifactHandle) -> Result<(), StepError> {
        self.cleaned.lock().push(artifact.location().to_string());
        Ok(())
    }
}

/// Runner that panics for one source key and delegates otherwise
pub struct PanickingRunner {
    pub panic_on: String,
    pub inner: Arc<dyn JobRunner>,
}

#[async_trait::async_trait]
impl JobRunner for PanickingRunner {
    async fn run_job(
        &self,
        job: JobDescriptor,
        cancel: CancellationToken,
    ) -> conveyor_core::Result<JobResult> {
        if job.source.key == self.panic_on {
            panic!("runner blew up on {}", job.source.key);
        }
        self.inner.run_job(job, cancel).await
    }
}

pub fn job(key: &str) -> JobDescriptor {
    JobDescriptor::new(Locator::new("in", key), Locator::new("out", format!("enhanced_{key}")))
        .with_id(format!("job-{key}"))
}

/// Policy with the given attempt budget and a 1 s / x2 backoff
pub fn policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(60), attempts)
        .expect("valid policy")
}

/// Same timeout and retry policy for every step; cleanup runs once
pub fn uniform_settings(timeout: Duration, attempts: u32) -> WorkflowSettings {
    let step = StepSettings::new(timeout, policy(attempts));
    WorkflowSettings {
        fetch: step,
        transform: step,
        store: step,
        cleanup: StepSettings::new(timeout, RetryPolicy::no_retry()),
    }
}
