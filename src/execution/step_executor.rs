//! # Step Executor
//!
//! Runs one named step of a job under a timeout and a retry policy.
//!
//! ## Contract
//!
//! - The operation is invoked at most `policy.maximum_attempts()` times.
//! - An attempt that does not finish within the step timeout is a failed
//!   attempt; its future is dropped.
//! - Transient errors and timeouts are retried after
//!   [`RetryPolicy::backoff_for`]; permanent errors end the step at once.
//! - Cancellation is observed before each attempt, while an attempt is in
//!   flight, and during backoff. A result that is already available when
//!   cancellation arrives wins, so a produced artifact is never lost.
//!
//! The executor holds no state across calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StepError, TerminalError};
use crate::models::StepKind;
use crate::resilience::RetryPolicy;

/// Tagged outcome of a step
#[derive(Debug)]
pub enum StepOutcome<T> {
    Succeeded(T),
    /// Retries exhausted or a non-retryable error
    Failed(TerminalError),
    /// Cancellation observed before a result was available
    Cancelled(TerminalError),
}

impl<T> StepOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn into_result(self) -> Result<T, TerminalError> {
        match self {
            Self::Succeeded(value) => Ok(value),
            Self::Failed(error) | Self::Cancelled(error) => Err(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `operation` under `step_timeout` and `policy`
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        step: StepKind,
        step_timeout: Duration,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> StepOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let max_attempts = policy.maximum_attempts();
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                debug!(step = %step, attempt = attempt, "🛑 Step cancelled before attempt");
                return StepOutcome::Cancelled(TerminalError::new(
                    step,
                    attempt - 1,
                    StepError::Cancelled,
                ));
            }

            debug!(step = %step, attempt = attempt, max_attempts = max_attempts, "▶️ Step attempt starting");

            let attempt_result = tokio::select! {
                biased;
                result = timeout(step_timeout, operation(attempt)) => {
                    result.unwrap_or(Err(StepError::Timeout(step_timeout)))
                }
                _ = cancel.cancelled() => Err(StepError::Cancelled),
            };

            let error = match attempt_result {
                Ok(value) => {
                    debug!(step = %step, attempt = attempt, "✅ Step attempt succeeded");
                    return StepOutcome::Succeeded(value);
                }
                Err(StepError::Cancelled) => {
                    debug!(step = %step, attempt = attempt, "🛑 Step cancelled during attempt");
                    return StepOutcome::Cancelled(TerminalError::new(
                        step,
                        attempt,
                        StepError::Cancelled,
                    ));
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                warn!(step = %step, attempt = attempt, error = %error, "❌ Step failed with non-retryable error");
                return StepOutcome::Failed(TerminalError::new(step, attempt, error));
            }

            if attempt >= max_attempts {
                warn!(step = %step, attempts = attempt, error = %error, "❌ Step retries exhausted");
                return StepOutcome::Failed(TerminalError::new(step, attempt, error));
            }

            let delay = policy.backoff_for(attempt);
            debug!(
                step = %step,
                attempt = attempt,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "🔄 Step attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(step = %step, attempt = attempt, "🛑 Step cancelled during backoff");
                    return StepOutcome::Cancelled(TerminalError::new(
                        step,
                        attempt,
                        StepError::Cancelled,
                    ));
                }
                _ = sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
