//! Error recovery for remote API calls
//!
//! `RecoveryEngine::execute_with_recovery` wraps an operation in a small state
//! machine: transient failures (matched by `ErrorClassifier`) are retried with
//! exponential backoff and jitter; fatal failures and exhausted retries run an
//! optional fallback once. Callers always get a `RecoveryOutcome`.
//!
//! `execute_bulk_with_recovery` applies the same machine to each item of a
//! collection in fixed-size concurrent batches.

pub mod bulk;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod stats;

pub use bulk::{BulkConfig, BulkItemResult, BulkOptions, BulkProgress, BulkReport, ProgressCallback};
pub use classifier::{ErrorCategory, ErrorClassifier};
pub use config::RetryConfig;
pub use engine::{Fallback, RecoveryEngine, RecoveryOptions, RecoveryOutcome, RecoveryPath};
pub use stats::{RecoveryStats, MAX_TRACKED_OPERATIONS};
