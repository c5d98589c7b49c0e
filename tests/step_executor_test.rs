//! # Step Executor Integration Tests
//!
//! Retry timing and attempt accounting under a paused tokio clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::policy;
use conveyor_core::error::StepError;
use conveyor_core::execution::{StepExecutor, StepOutcome};
use conveyor_core::models::StepKind;
use conveyor_core::ErrorClassification;

#[tokio::test(start_paused = true)]
async fn timeout_then_success_waits_one_initial_interval() {
    let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let step_timeout = Duration::from_secs(5);
    let origin = Instant::now();

    let recorded = Arc::clone(&starts);
    let outcome = StepExecutor::new()
        .execute(StepKind::Transform, step_timeout, &policy(3), &CancellationToken::new(), |attempt| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().push(Instant::now());
                if attempt == 1 {
                    std::future::pending::<()>().await;
                }
                Ok::<_, StepError>(attempt)
            }
        })
        .await;

    assert!(matches!(outcome, StepOutcome::Succeeded(2)));

    let starts = starts.lock();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0] - origin, Duration::ZERO);
    // Timed-out attempt, then one initial interval of backoff
    assert_eq!(starts[1] - origin, step_timeout + Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn permanently_failing_step_runs_exactly_k_attempts() {
    for k in 1..=5u32 {
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&attempts);

        let outcome: StepOutcome<()> = StepExecutor::new()
            .execute(StepKind::Fetch, Duration::from_secs(5), &policy(k), &CancellationToken::new(), |_| {
                let counter = Arc::clone(&counter);
                async move {
                    *counter.lock() += 1;
                    Err(StepError::transient("still down"))
                }
            })
            .await;

        assert_eq!(*attempts.lock(), k);
        match outcome {
            StepOutcome::Failed(error) => {
                assert_eq!(error.attempts, k);
                assert_eq!(error.classification(), ErrorClassification::RetriesExhausted);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();
    let recorded = Arc::clone(&starts);

    let _: StepOutcome<()> = StepExecutor::new()
        .execute(StepKind::Store, Duration::from_secs(5), &policy(4), &CancellationToken::new(), |_| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().push(Instant::now());
                Err(StepError::transient("busy"))
            }
        })
        .await;

    let offsets: Vec<Duration> = starts.lock().iter().map(|s| *s - origin).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(7),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_stops_retrying() {
    let cancel = CancellationToken::new();
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&attempts);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let outcome: StepOutcome<()> = StepExecutor::new()
        .execute(StepKind::Fetch, Duration::from_secs(5), &policy(3), &cancel, |_| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock() += 1;
                Err(StepError::transient("flaky"))
            }
        })
        .await;

    assert_eq!(*attempts.lock(), 1);
    match outcome {
        StepOutcome::Cancelled(error) => {
            assert_eq!(error.classification(), ErrorClassification::Cancelled);
            assert_eq!(error.attempts, 1);
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
}
