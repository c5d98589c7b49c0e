use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConveyorError;

/// Job workflow state
///
/// `Fetching → Transforming → Storing → Cleaning → Done`. Any producing step
/// may short-circuit to `Cleaning`, and `Cleaning` ends in `Failed` when one
/// of them did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Downloading the source artifact
    Fetching,
    /// Calling the transformation service
    Transforming,
    /// Uploading the transformed artifact
    Storing,
    /// Discarding every registered artifact
    Cleaning,
    /// All steps succeeded and cleanup ran
    Done,
    /// A step failed or the job was cancelled; cleanup ran
    Failed,
}

impl JobState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Check if a step operation runs in this state
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Fetching | Self::Transforming | Self::Storing)
    }

    /// Legal edges of the workflow
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Fetching, Transforming)
                | (Transforming, Storing)
                | (Storing, Cleaning)
                | (Fetching, Cleaning)
                | (Transforming, Cleaning)
                | (Cleaning, Done)
                | (Cleaning, Failed)
        )
    }

    /// The state after `next`, or an error for an edge the workflow lacks
    pub fn transition_to(self, next: JobState) -> crate::error::Result<JobState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ConveyorError::StateTransitionError(format!(
                "job cannot move from {self} to {next}"
            )))
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching => write!(f, "fetching"),
            Self::Transforming => write!(f, "transforming"),
            Self::Storing => write!(f, "storing"),
            Self::Cleaning => write!(f, "cleaning"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetching" => Ok(Self::Fetching),
            "transforming" => Ok(Self::Transforming),
            "storing" => Ok(Self::Storing),
            "cleaning" => Ok(Self::Cleaning),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Default state for new jobs
impl Default for JobState {
    fn default() -> Self {
        Self::Fetching
    }
}

/// Worker slot state, owned by the supervisor
///
/// `Starting → Running → Dead → Starting`, plus `Stopped` after shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Process is being spawned
    Starting,
    /// Process is alive
    Running,
    /// Process exited and has not been replaced yet
    Dead,
    /// Pool was shut down
    Stopped,
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// A process exists for the slot
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn can_transition_to(&self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Dead)
                | (Running, Dead)
                | (Dead, Starting)
                | (Starting, Stopped)
                | (Running, Stopped)
                | (Dead, Stopped)
        )
    }

    pub fn transition_to(self, next: SlotState) -> crate::error::Result<SlotState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ConveyorError::StateTransitionError(format!(
                "slot cannot move from {self} to {next}"
            )))
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Dead => write!(f, "dead"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for SlotState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "dead" => Ok(Self::Dead),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid slot state: {s}")),
        }
    }
}
