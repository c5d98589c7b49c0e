//! # Batch Dispatcher Integration Tests
//!
//! Whole batches through the dispatcher with a local runner over scripted
//! step operations: result completeness, the concurrency bound, failure
//! isolation and batch cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{job, uniform_settings, PanickingRunner, Scripted, ScriptedSteps};
use conveyor_core::logging::Verbosity;
use conveyor_core::models::{JobDescriptor, JobId, JobStatus, StepKind};
use conveyor_core::orchestration::{BatchDispatcher, JobRunner, LocalJobRunner};
use conveyor_core::{ConveyorError, ErrorClassification};

fn local_runner(steps: &Arc<ScriptedSteps>) -> Arc<dyn JobRunner> {
    Arc::new(LocalJobRunner::new(
        steps.clone(),
        uniform_settings(Duration::from_secs(30), 3),
        "enhance",
    ))
}

fn batch(keys: &[&str]) -> Vec<JobDescriptor> {
    keys.iter().map(|k| job(k)).collect()
}

#[tokio::test(start_paused = true)]
async fn three_jobs_one_permanent_transform_failure() {
    let steps = Arc::new(
        ScriptedSteps::new()
            .with_delay(Duration::from_millis(100))
            .script_for(
                "b.png",
                StepKind::Transform,
                &[Scripted::Transient, Scripted::Transient, Scripted::Transient],
            ),
    );
    let dispatcher = BatchDispatcher::new(local_runner(&steps), Verbosity::Normal);

    let report = dispatcher
        .run_batch(batch(&["a.png", "b.png", "c.png"]), 2)
        .await
        .unwrap();

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.exit_code(), 1);

    let a = report.result_for(&JobId::new("job-a.png")).unwrap();
    let b = report.result_for(&JobId::new("job-b.png")).unwrap();
    let c = report.result_for(&JobId::new("job-c.png")).unwrap();
    assert_eq!(a.status, JobStatus::Succeeded);
    assert_eq!(c.status, JobStatus::Succeeded);
    assert_eq!(b.status, JobStatus::Failed);

    let failure = b.failure.as_ref().unwrap();
    assert_eq!(failure.step, Some(StepKind::Transform));
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.classification, ErrorClassification::RetriesExhausted);

    assert!(dispatcher.peak_in_flight() <= 2);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn in_flight_never_exceeds_limit() {
    let steps = Arc::new(ScriptedSteps::new().with_delay(Duration::from_secs(1)));
    let dispatcher = BatchDispatcher::new(local_runner(&steps), Verbosity::Quiet);
    let keys: Vec<String> = (0..12).map(|i| format!("img-{i}.png")).collect();
    let jobs: Vec<JobDescriptor> = keys.iter().map(|k| job(k)).collect();

    let report = dispatcher.run_batch(jobs, 3).await.unwrap();

    assert_eq!(report.results.len(), 12);
    assert!(report.summary.all_succeeded());
    assert_eq!(dispatcher.peak_in_flight(), 3);
    assert!(steps.peak_active() <= 3);
}

#[tokio::test(start_paused = true)]
async fn admission_is_fifo() {
    let steps = Arc::new(ScriptedSteps::new().with_delay(Duration::from_millis(10)));
    let dispatcher = BatchDispatcher::new(local_runner(&steps), Verbosity::Quiet);

    dispatcher
        .run_batch(batch(&["1.png", "2.png", "3.png", "4.png"]), 1)
        .await
        .unwrap();

    let fetch_order: Vec<String> = steps
        .calls()
        .into_iter()
        .filter(|c| c.step == StepKind::Fetch)
        .map(|c| c.job)
        .collect();
    assert_eq!(fetch_order, vec!["1.png", "2.png", "3.png", "4.png"]);
}

#[tokio::test]
async fn empty_batch_and_zero_limit_are_rejected() {
    let steps = Arc::new(ScriptedSteps::new());
    let dispatcher = BatchDispatcher::new(local_runner(&steps), Verbosity::Quiet);

    let empty = dispatcher.run_batch(Vec::new(), 2).await.unwrap_err();
    assert!(matches!(empty, ConveyorError::InvalidBatch(_)));

    let zero = dispatcher.run_batch(batch(&["a.png"]), 0).await.unwrap_err();
    assert!(matches!(zero, ConveyorError::ConfigurationError(_)));
    assert!(zero.is_configuration());

    let duplicate = dispatcher
        .run_batch(batch(&["a.png", "a.png"]), 2)
        .await
        .unwrap_err();
    assert!(matches!(duplicate, ConveyorError::InvalidBatch(_)));

    assert!(steps.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn panicking_runner_fails_only_its_job() {
    let steps = Arc::new(ScriptedSteps::new());
    let runner = Arc::new(PanickingRunner {
        panic_on: "boom.png".to_string(),
        inner: local_runner(&steps),
    });
    let dispatcher = BatchDispatcher::new(runner, Verbosity::Quiet);

    let report = dispatcher
        .run_batch(batch(&["ok-1.png", "boom.png", "ok-2.png"]), 2)
        .await
        .unwrap();

    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    let boom = report.result_for(&JobId::new("job-boom.png")).unwrap();
    assert_eq!(boom.classification(), Some(ErrorClassification::Unexpected));
    assert!(boom.failure.as_ref().unwrap().message.contains("runner blew up"));
}

#[tokio::test(start_paused = true)]
async fn cancelling_batch_reports_every_job() {
    let steps = Arc::new(ScriptedSteps::new().script(StepKind::Transform, &[Scripted::Hang; 8]));
    let dispatcher = Arc::new(BatchDispatcher::new(local_runner(&steps), Verbosity::Quiet));

    let cancel = dispatcher.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
    });

    let report = dispatcher
        .run_batch(batch(&["a.png", "b.png", "c.png", "d.png", "e.png"]), 2)
        .await
        .unwrap();

    // Two were in flight, three never started; all five are accounted for
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.summary.cancelled, 5);
    assert_eq!(report.summary.failed, 5);
    assert_eq!(steps.calls_for(StepKind::Fetch), 2);

    // The in-flight jobs still discarded their fetched artifacts
    assert_eq!(steps.cleaned().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn identical_batches_classify_identically() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let steps = Arc::new(
            ScriptedSteps::new().script_for("bad.png", StepKind::Fetch, &[Scripted::Permanent]),
        );
        let dispatcher = BatchDispatcher::new(local_runner(&steps), Verbosity::Quiet);
        let report = dispatcher
            .run_batch(batch(&["good.png", "bad.png"]), 2)
            .await
            .unwrap();

        let mut classified: Vec<(String, Option<ErrorClassification>)> = report
            .results
            .iter()
            .map(|r| (r.job_id.to_string(), r.classification()))
            .collect();
        classified.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes.push(classified);
    }

    assert_eq!(outcomes[0], outcomes[1]);
}
