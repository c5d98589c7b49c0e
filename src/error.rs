//! # Error Types
//!
//! Crate-wide error type plus the step-level errors that drive retry decisions.
//!
//! - [`ConveyorError`]: configuration, validation, substrate and I/O failures.
//!   Only configuration/validation errors abort a batch before work starts.
//! - [`StepError`]: the failure of a single attempt of a step. Transient errors
//!   and timeouts are retried, permanent errors are not.
//! - [`TerminalError`]: what a step reports once it will not be attempted again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::StepKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConveyorError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Substrate error: {0}")]
    SubstrateError(String),
    #[error("Supervisor error: {0}")]
    SupervisorError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConveyorError {
    /// Errors that must stop a batch before any job is admitted
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_) | Self::ValidationError(_) | Self::InvalidBatch(_)
        )
    }
}

impl From<std::io::Error> for ConveyorError {
    fn from(error: std::io::Error) -> Self {
        ConveyorError::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for ConveyorError {
    fn from(error: serde_json::Error) -> Self {
        ConveyorError::SerializationError(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::config::ConfigurationError> for ConveyorError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        ConveyorError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConveyorError>;

/// Failure of one attempt of a step
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StepError {
    /// May succeed on retry (network error, rate limit, busy service)
    #[error("transient failure: {0}")]
    Transient(String),
    /// Will not succeed on retry (missing object, malformed response)
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// The attempt did not finish within the step timeout
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    /// The attempt was abandoned because the job was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl StepError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether another attempt may be made after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Why a job ended in the failed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Every allowed attempt failed with a retryable error
    RetriesExhausted,
    /// An attempt failed with an error that is never retried
    NonRetryable,
    /// The job was cancelled before or while a step ran
    Cancelled,
    /// The job runner itself faulted (panic, substrate failure)
    Unexpected,
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::NonRetryable => write!(f, "non_retryable"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// A step that will not be attempted again
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step}' failed after {attempts} attempt(s): {last_error}")]
pub struct TerminalError {
    pub step: StepKind,
    pub attempts: u32,
    pub last_error: StepError,
}

impl TerminalError {
    pub fn new(step: StepKind, attempts: u32, last_error: StepError) -> Self {
        Self {
            step,
            attempts,
            last_error,
        }
    }

    pub fn classification(&self) -> ErrorClassification {
        match self.last_error {
            StepError::Cancelled => ErrorClassification::Cancelled,
            StepError::Permanent(_) => ErrorClassification::NonRetryable,
            StepError::Transient(_) | StepError::Timeout(_) => {
                ErrorClassification::RetriesExhausted
            }
        }
    }
}
