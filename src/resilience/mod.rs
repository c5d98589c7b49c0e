//! # Resilience Module
//!
//! Retry policies for individual steps. Each step of a job carries its own
//! [`RetryPolicy`]; the step executor consults it between attempts.
//!
//! ## Usage
//!
//! ```rust
//! use conveyor_core::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(300), 3)
//!     .expect("valid policy");
//!
//! assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
//! assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
//! ```

pub mod retry_policy;

pub use retry_policy::RetryPolicy;
