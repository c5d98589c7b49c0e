//! # Local Adapters
//!
//! Concrete storage and transformation adapters so the binaries run end to
//! end on one machine. Production deployments swap these for object-storage
//! and service clients behind the same [`StepOperations`] seam.
//!
//! [`StepOperations`]: crate::orchestration::types::StepOperations

pub mod command_transformer;
pub mod local_steps;
pub mod local_storage;

pub use command_transformer::CommandTransformer;
pub use local_steps::LocalSteps;
pub use local_storage::LocalFsStorage;
