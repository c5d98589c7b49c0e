//! # System Constants
//!
//! Names and defaults that define the operational boundaries of the pipeline.

/// Workflow type registered with the durable-execution substrate
pub const WORKFLOW_TYPE: &str = "ArtifactPipelineWorkflow";

/// Production defaults, also used by `ConveyorConfig::default()`
pub mod defaults {
    pub const MAX_CONCURRENT_JOBS: usize = 5;
    pub const DESTINATION_PREFIX: &str = "enhanced_";
    pub const INSTRUCTION: &str =
        "Make this image more vibrant, increase clarity and sharpness, improve lighting";
    pub const TASK_QUEUE: &str = "artifact-pipeline-queue";

    pub const FETCH_TIMEOUT_MS: u64 = 5 * 60 * 1000;
    pub const TRANSFORM_TIMEOUT_MS: u64 = 10 * 60 * 1000;
    pub const STORE_TIMEOUT_MS: u64 = 5 * 60 * 1000;
    pub const CLEANUP_TIMEOUT_MS: u64 = 60 * 1000;

    pub const RETRY_INITIAL_INTERVAL_MS: u64 = 1000;
    pub const RETRY_BACKOFF_COEFFICIENT: f64 = 2.0;
    pub const RETRY_MAXIMUM_INTERVAL_MS: u64 = 5 * 60 * 1000;
    pub const RETRY_MAXIMUM_ATTEMPTS: u32 = 3;

    pub const POOL_SIZE: usize = 4;
    pub const STAGGER_INTERVAL_MS: u64 = 500;
    pub const SUPERVISOR_POLL_INTERVAL_MS: u64 = 2000;
    pub const GRACE_PERIOD_MS: u64 = 5000;
    pub const CRASH_LOOP_WINDOW_MS: u64 = 10_000;

    pub const WORKER_POLL_INTERVAL_MS: u64 = 1000;
    pub const CLAIM_LEASE_MS: u64 = 60_000;
    pub const RESULT_POLL_INTERVAL_MS: u64 = 500;
}

/// Process exit codes for the driver binary
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    /// Rejected before any job was admitted (sysexits EX_CONFIG)
    pub const CONFIGURATION_ERROR: u8 = 78;
    pub const MAX_FAILURE_CODE: u8 = u8::MAX;
}

/// Jitter never extends a delay by more than this fraction
pub const MAX_JITTER_FRACTION: f64 = 0.1;
