// State definitions for job workflows and supervisor worker slots
//
// Transitions are validated with `can_transition_to`; the owners (JobWorkflow,
// WorkerSupervisor) are the only writers.

pub mod states;

pub use states::{JobState, SlotState};
