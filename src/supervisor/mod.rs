//! # Worker Pool Supervision
//!
//! Launches, monitors and restarts a fixed-size pool of worker processes and
//! routes each worker's output into its own log sink.

pub mod log_sink;
pub mod worker_supervisor;

pub use log_sink::{open_sink, FileSink, LogSink, SinkMode, TeeSink};
pub use worker_supervisor::{
    SupervisorEvent, SupervisorSettings, WorkerCommand, WorkerProcessState, WorkerSupervisor,
    WORKER_SLOT_ENV,
};
