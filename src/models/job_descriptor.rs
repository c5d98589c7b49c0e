//! # Job Descriptor Model
//!
//! The immutable description of one unit of work: where the artifact comes
//! from, where the transformed artifact goes, and the parameters for the
//! transformation.
//!
//! ## Overview
//!
//! A `JobDescriptor` is consumed by exactly one `JobWorkflow` execution.
//! Retries of individual steps reuse the same descriptor, and re-delivery
//! after a worker crash hands the same descriptor (same `id`) to a new worker.
//!
//! ## Parameters
//!
//! `parameters` is a free-form map of JSON values. The `instruction` key
//! carries the natural-language instruction passed to the transformation
//! service:
//!
//! ```json
//! { "instruction": "Increase contrast", "quality": 90 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{ConveyorError, Result};

/// Parameter key carrying the transformation instruction
pub const INSTRUCTION_PARAMETER: &str = "instruction";

/// The steps a job workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Fetch,
    Transform,
    Store,
    Cleanup,
}

impl StepKind {
    /// Steps that produce an artifact which must later be cleaned up
    pub fn produces_artifact(&self) -> bool {
        matches!(self, Self::Fetch | Self::Transform)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Transform => write!(f, "transform"),
            Self::Store => write!(f, "store"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

impl std::str::FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Self::Fetch),
            "transform" => Ok(Self::Transform),
            "store" => Ok(Self::Store),
            "cleanup" => Ok(Self::Cleanup),
            _ => Err(format!("Invalid step kind: {s}")),
        }
    }
}

/// Bucket/key address of an object in storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub bucket: String,
    pub key: String,
}

impl Locator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Last path segment of the key
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Everything before the last `/` of the key, if the key has a folder
    pub fn folder(&self) -> Option<&str> {
        self.key.rsplit_once('/').map(|(folder, _)| folder)
    }

    pub fn is_complete(&self) -> bool {
        !self.bucket.trim().is_empty() && !self.key.trim().is_empty()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Unique job identifier, also used as the substrate idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh `job-<uuid v4>` identifier
    pub fn generate() -> Self {
        Self(format!("job-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One unit of work in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: JobId,
    pub source: Locator,
    pub destination: Locator,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl JobDescriptor {
    /// Create a descriptor with a generated id and no parameters
    pub fn new(source: Locator, destination: Locator) -> Self {
        Self {
            id: JobId::generate(),
            source,
            destination,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_instruction(self, instruction: impl Into<String>) -> Self {
        self.with_parameter(INSTRUCTION_PARAMETER, serde_json::Value::String(instruction.into()))
    }

    /// The transformation instruction, if one was supplied as a string
    pub fn instruction(&self) -> Option<&str> {
        self.parameters
            .get(INSTRUCTION_PARAMETER)
            .and_then(serde_json::Value::as_str)
    }

    /// Reject descriptors that could never run
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConveyorError::ValidationError(
                "job id must not be empty".to_string(),
            ));
        }
        if !self.source.is_complete() {
            return Err(ConveyorError::ValidationError(format!(
                "job {}: source bucket and key must not be empty",
                self.id
            )));
        }
        if !self.destination.is_complete() {
            return Err(ConveyorError::ValidationError(format!(
                "job {}: destination bucket and key must not be empty",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_locator_path_helpers() {
        let nested = Locator::new("photos", "2024/summer/beach.jpg");
        assert_eq!(nested.basename(), "beach.jpg");
        assert_eq!(nested.folder(), Some("2024/summer"));

        let flat = Locator::new("photos", "beach.jpg");
        assert_eq!(flat.basename(), "beach.jpg");
        assert_eq!(flat.folder(), None);
        assert_eq!(flat.to_string(), "photos/beach.jpg");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert!(a.as_str().starts_with("job-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_instruction_parameter() {
        let job = JobDescriptor::new(Locator::new("in", "a.png"), Locator::new("out", "b.png"))
            .with_instruction("sharpen")
            .with_parameter("quality", json!(90));

        assert_eq!(job.instruction(), Some("sharpen"));

        let no_instruction = job.clone().with_parameter(INSTRUCTION_PARAMETER, json!(5));
        assert_eq!(no_instruction.instruction(), None);
    }

    #[test]
    fn test_validation_rejects_empty_locators() {
        let job = JobDescriptor::new(Locator::new("in", ""), Locator::new("out", "b.png"));
        assert!(job.validate().is_err());

        let job = JobDescriptor::new(Locator::new("in", "a.png"), Locator::new(" ", "b.png"));
        assert!(job.validate().is_err());

        let job = JobDescriptor::new(Locator::new("in", "a.png"), Locator::new("out", "b.png"));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_step_kind_round_trip() {
        assert_eq!(StepKind::Transform.to_string(), "transform");
        assert_eq!("cleanup".parse::<StepKind>().unwrap(), StepKind::Cleanup);
        assert!("upload".parse::<StepKind>().is_err());
        assert!(StepKind::Fetch.produces_artifact());
        assert!(!StepKind::Store.produces_artifact());
    }
}
