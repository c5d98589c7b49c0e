//! # Worker Process Runtime
//!
//! The claim/run/publish loop that every supervised worker process executes.

pub mod runtime;

pub use runtime::{RuntimeStats, WorkerRuntime, WorkerRuntimeSettings};
