//! # Cirrus
//!
//! Adaptive resource management for clients of a remote storage API.
//!
//! ## Features
//!
//! - **Session facade**: one explicitly constructed set of components per session
//! - **Layered configuration**: TOML file plus `CIRRUS__*` environment overrides
//! - **Closed-loop tuning**: the optimizer retunes cache, queue, throttle,
//!   batching, retries and prefetching from live telemetry
//!
//! The component crates are re-exported under their own names.

pub mod config;
pub mod session;

pub use config::{CirrusConfig, ConfigError, ConfigLoader, LoggingConfig};
pub use session::{FetchError, ResourceSession, ResourceSessionBuilder};

pub use cirrus_cache as cache;
pub use cirrus_common as common;
pub use cirrus_dispatch as dispatch;
pub use cirrus_performance as performance;
pub use cirrus_prefetch as prefetch;
pub use cirrus_recovery as recovery;

pub use cirrus_common::{ApiError, OptimizationStrategy, Priority, ResourceEvent, Tunable};
