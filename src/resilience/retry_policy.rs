//! # Retry Policy
//!
//! Exponential backoff attached to a single step. The delay before attempt
//! `n + 1` is `min(initial × coefficient^(n-1), maximum)`, optionally
//! stretched by up to 10% jitter (still capped at `maximum`).

use std::time::Duration;

use crate::constants::{defaults, MAX_JITTER_FRACTION};
use crate::error::{ConveyorError, Result};

/// Validated retry policy; construct with [`RetryPolicy::new`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    initial_interval: Duration,
    backoff_coefficient: f64,
    maximum_interval: Duration,
    maximum_attempts: u32,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(
        initial_interval: Duration,
        backoff_coefficient: f64,
        maximum_interval: Duration,
        maximum_attempts: u32,
    ) -> Result<Self> {
        if maximum_attempts < 1 {
            return Err(ConveyorError::ConfigurationError(
                "maximum_attempts must be at least 1".to_string(),
            ));
        }
        if !backoff_coefficient.is_finite() || backoff_coefficient < 1.0 {
            return Err(ConveyorError::ConfigurationError(format!(
                "backoff_coefficient must be a finite number >= 1, got {backoff_coefficient}"
            )));
        }
        if initial_interval > maximum_interval {
            return Err(ConveyorError::ConfigurationError(format!(
                "initial_interval ({initial_interval:?}) exceeds maximum_interval ({maximum_interval:?})"
            )));
        }

        Ok(Self {
            initial_interval,
            backoff_coefficient,
            maximum_interval,
            maximum_attempts,
            jitter: false,
        })
    }

    /// A single attempt and no backoff, the cleanup default
    pub fn no_retry() -> Self {
        Self {
            maximum_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn backoff_coefficient(&self) -> f64 {
        self.backoff_coefficient
    }

    pub fn maximum_interval(&self) -> Duration {
        self.maximum_interval
    }

    pub fn maximum_attempts(&self) -> u32 {
        self.maximum_attempts
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if !self.jitter {
            return base;
        }

        let stretched = base.as_secs_f64() * (1.0 + fastrand::f64() * MAX_JITTER_FRACTION);
        Duration::try_from_secs_f64(stretched)
            .unwrap_or(self.maximum_interval)
            .min(self.maximum_interval)
    }

    fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);

        if !seconds.is_finite() || seconds >= self.maximum_interval.as_secs_f64() {
            return self.maximum_interval;
        }
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(self.maximum_interval)
            .min(self.maximum_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(defaults::RETRY_INITIAL_INTERVAL_MS),
            backoff_coefficient: defaults::RETRY_BACKOFF_COEFFICIENT,
            maximum_interval: Duration::from_millis(defaults::RETRY_MAXIMUM_INTERVAL_MS),
            maximum_attempts: defaults::RETRY_MAXIMUM_ATTEMPTS,
            jitter: false,
        }
    }
}
