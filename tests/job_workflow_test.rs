//! # Job Workflow Integration Tests
//!
//! Runs whole jobs against scripted step operations and checks step ordering,
//! failure classification, and that every artifact a job produced is cleaned
//! up exactly once on every exit path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{job, uniform_settings, Scripted, ScriptedSteps};
use conveyor_core::models::{JobStatus, StepKind};
use conveyor_core::orchestration::{JobWorkflow, WorkflowSettings};
use conveyor_core::state_machine::JobState;
use conveyor_core::ErrorClassification;

fn workflow(steps: &Arc<ScriptedSteps>, settings: WorkflowSettings, cancel: CancellationToken) -> JobWorkflow {
    JobWorkflow::new(
        job("cat.jpg"),
        steps.clone(),
        Arc::new(settings),
        "enhance",
        cancel,
    )
}

#[tokio::test(start_paused = true)]
async fn successful_job_runs_steps_in_order_and_cleans_up() {
    let steps = Arc::new(ScriptedSteps::new());
    let flow = workflow(&steps, uniform_settings(Duration::from_secs(30), 3), CancellationToken::new());
    assert_eq!(flow.state(), JobState::Fetching);

    let result = flow.run().await;

    assert_eq!(result.status, JobStatus::Succeeded);
    assert!(result.failure.is_none());
    assert_eq!(result.destination.as_ref().map(|d| d.key.as_str()), Some("enhanced_cat.jpg"));

    let order: Vec<StepKind> = steps.calls().iter().map(|c| c.step).collect();
    assert_eq!(order, vec![StepKind::Fetch, StepKind::Transform, StepKind::Store]);

    // Both staged artifacts discarded, in registration order
    assert_eq!(steps.cleaned(), steps.produced());
    assert_eq!(steps.cleaned(), vec!["fetch:cat.jpg", "transform:cat.jpg"]);
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_has_nothing_to_clean() {
    let steps = Arc::new(ScriptedSteps::new().script(StepKind::Fetch, &[Scripted::Permanent]));
    let result = workflow(&steps, uniform_settings(Duration::from_secs(30), 3), CancellationToken::new())
        .run()
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.expect("failure details");
    assert_eq!(failure.step, Some(StepKind::Fetch));
    assert_eq!(failure.classification, ErrorClassification::NonRetryable);
    assert_eq!(failure.attempts, 1);
    assert!(steps.cleaned().is_empty());
    assert_eq!(steps.calls_for(StepKind::Transform), 0);
}

#[tokio::test(start_paused = true)]
async fn transform_failure_cleans_fetched_artifact() {
    let steps = Arc::new(ScriptedSteps::new().script(StepKind::Transform, &[Scripted::Permanent]));
    let result = workflow(&steps, uniform_settings(Duration::from_secs(30), 3), CancellationToken::new())
        .run()
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.classification(), Some(ErrorClassification::NonRetryable));
    assert_eq!(steps.calls_for(StepKind::Store), 0);
    assert_eq!(steps.cleaned(), vec!["fetch:cat.jpg"]);
}

#[tokio::test(start_paused = true)]
async fn store_retries_exhausted_cleans_both_artifacts() {
    let steps = Arc::new(ScriptedSteps::new().script(
        StepKind::Store,
        &[Scripted::Transient, Scripted::Transient, Scripted::Transient],
    ));
    let result = workflow(&steps, uniform_settings(Duration::from_secs(30), 3), CancellationToken::new())
        .run()
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.expect("failure details");
    assert_eq!(failure.step, Some(StepKind::Store));
    assert_eq!(failure.classification, ErrorClassification::RetriesExhausted);
    assert_eq!(failure.attempts, 3);
    assert_eq!(steps.calls_for(StepKind::Store), 3);
    assert_eq!(steps.cleaned(), vec!["fetch:cat.jpg", "transform:cat.jpg"]);
}

#[tokio::test(start_paused = true)]
async fn transient_transform_error_recovers_on_retry() {
    let steps = Arc::new(ScriptedSteps::new().script(StepKind::Transform, &[Scripted::Transient]));
    let result = workflow(&steps, uniform_settings(Duration::from_secs(30), 3), CancellationToken::new())
        .run()
        .await;

    assert_eq!(result.status, JobStatus::Succeeded);
    assert_eq!(steps.calls_for(StepKind::Transform), 2);
    assert_eq!(steps.cleaned().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn hanging_transform_times_out_per_attempt() {
    let steps = Arc::new(ScriptedSteps::new().script(
        StepKind::Transform,
        &[Scripted::Hang, Scripted::Hang],
    ));
    let result = workflow(&steps, uniform_settings(Duration::from_secs(10), 2), CancellationToken::new())
        .run()
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.classification(), Some(ErrorClassification::RetriesExhausted));
    assert_eq!(steps.calls_for(StepKind::Transform), 2);
    assert_eq!(steps.cleaned(), vec!["fetch:cat.jpg"]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_transform_still_cleans_up() {
    let steps = Arc::new(ScriptedSteps::new().script(StepKind::Transform, &[Scripted::Hang]));
    let cancel = CancellationToken::new();
    let flow = workflow(&steps, uniform_settings(Duration::from_secs(600), 3), cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let result = flow.run().await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.expect("failure details");
    assert_eq!(failure.classification, ErrorClassification::Cancelled);
    assert_eq!(failure.step, Some(StepKind::Transform));
    assert_eq!(steps.calls_for(StepKind::Transform), 1);
    assert_eq!(steps.cleaned(), vec!["fetch:cat.jpg"]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_runs_no_steps() {
    let steps = Arc::new(ScriptedSteps::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = workflow(&steps, uniform_settings(Duration::from_secs(30), 3), cancel)
        .run()
        .await;

    assert_eq!(result.classification(), Some(ErrorClassification::Cancelled));
    assert!(steps.calls().is_empty());
    assert!(steps.cleaned().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rerunning_a_job_classifies_identically() {
    let script = [Scripted::Permanent];
    let mut classifications = Vec::new();

    for _ in 0..3 {
        let steps = Arc::new(ScriptedSteps::new().script(StepKind::Store, &script));
        let result = workflow(&steps, uniform_settings(Duration::from_secs(30), 3), CancellationToken::new())
            .run()
            .await;
        classifications.push(result.classification());
    }

    assert!(classifications
        .iter()
        .all(|c| *c == Some(ErrorClassification::NonRetryable)));
}
