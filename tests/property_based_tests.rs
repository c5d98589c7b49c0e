//! Property-based tests for retry backoff, batch input parsing and summaries

use std::time::Duration;

use proptest::prelude::*;

use conveyor_core::models::{
    BatchDefaults, BatchInput, BatchSummary, JobDescriptor, JobFailure, JobResult, Locator,
};
use conveyor_core::resilience::RetryPolicy;
use conveyor_core::ErrorClassification;

fn policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u64..5_000, 1.0f64..4.0, 0u64..600_000, 1u32..10, any::<bool>()).prop_map(
        |(initial_ms, coefficient, extra_ms, attempts, jitter)| {
            RetryPolicy::new(
                Duration::from_millis(initial_ms),
                coefficient,
                Duration::from_millis(initial_ms + extra_ms),
                attempts,
            )
            .expect("strategy only builds valid policies")
            .with_jitter(jitter)
        },
    )
}

fn result_strategy() -> impl Strategy<Value = JobResult> {
    ("[a-z]{1,8}", 0u64..10_000, prop_oneof![Just(None), Just(Some(ErrorClassification::NonRetryable)), Just(Some(ErrorClassification::Cancelled))])
        .prop_map(|(key, millis, failure)| {
            let job = JobDescriptor::new(Locator::new("in", &key), Locator::new("out", &key));
            let duration = Duration::from_millis(millis);
            match failure {
                None => JobResult::succeeded(&job, duration, 0),
                Some(classification) => JobResult::failed(
                    &job,
                    JobFailure {
                        classification,
                        step: None,
                        attempts: 1,
                        message: "failed".to_string(),
                    },
                    duration,
                    0,
                ),
            }
        })
}

proptest! {
    /// Property: backoff never exceeds the maximum interval and never shrinks below the initial one
    #[test]
    fn backoff_stays_within_bounds(policy in policy_strategy(), attempt in 1u32..64) {
        let delay = policy.backoff_for(attempt);
        prop_assert!(delay <= policy.maximum_interval());
        // Float conversion may lose a nanosecond
        prop_assert!(delay + Duration::from_micros(1) >= policy.initial_interval());
    }

    /// Property: without jitter, backoff is monotonically non-decreasing
    #[test]
    fn backoff_is_monotonic_without_jitter(policy in policy_strategy(), attempt in 1u32..63) {
        let policy = policy.with_jitter(false);
        prop_assert!(policy.backoff_for(attempt) <= policy.backoff_for(attempt + 1));
    }

    /// Property: a comma list yields one job per non-empty key, in order
    #[test]
    fn comma_list_yields_one_job_per_key(keys in prop::collection::vec("[a-z]{1,6}/[a-z]{1,6}\\.png", 1..20)) {
        let input = keys.join(",");
        let jobs = BatchInput::parse(&input, &BatchDefaults::default()).unwrap();

        prop_assert_eq!(jobs.len(), keys.len());
        for (job, key) in jobs.iter().zip(&keys) {
            prop_assert_eq!(&job.source.key, key);
            prop_assert!(job.destination.key.starts_with(job.source.folder().unwrap_or("")));
            prop_assert!(job.instruction().is_some());
        }
    }

    /// Property: the summary does not depend on completion order
    #[test]
    fn summary_is_order_independent(mut results in prop::collection::vec(result_strategy(), 0..30)) {
        let forward = BatchSummary::from_results(&results);
        results.reverse();
        let backward = BatchSummary::from_results(&results);

        prop_assert_eq!(forward, backward);
        prop_assert_eq!(forward.succeeded + forward.failed, forward.total);
        prop_assert!(forward.cancelled <= forward.failed);
    }
}
