//! # Artifact Handle
//!
//! Opaque reference to intermediate state (a staged download, a transformed
//! file) that must be discarded when its job finishes.
//!
//! Handles are deliberately not `Clone`: exactly one owner exists at a time,
//! first the step operation that created it and then the workflow's artifact
//! registry, which hands it back to the cleanup step exactly once.

use std::fmt;
use uuid::Uuid;

use super::job_descriptor::StepKind;

#[derive(Debug, PartialEq, Eq)]
pub struct ArtifactHandle {
    id: Uuid,
    produced_by: StepKind,
    location: String,
}

impl ArtifactHandle {
    pub fn new(produced_by: StepKind, location: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            produced_by,
            location: location.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn produced_by(&self) -> StepKind {
        self.produced_by
    }

    /// Adapter-specific location (a path for the filesystem adapters)
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.produced_by, self.id, self.location)
    }
}
