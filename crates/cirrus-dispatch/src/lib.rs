//! Dispatch layer for outbound remote API calls
//!
//! ## Components
//!
//! - **`RateThrottle`**: FIFO pacing so no two dispatches start closer than
//!   the configured minimum interval
//! - **`RequestQueue`**: bounded-concurrency dispatcher ordered by priority
//!   band, superseding pending entries that share an id
//! - **`BatchAggregator`**: coalesces calls issued within a short window into
//!   fewer physical calls and settles every caller individually
//!
//! All three pass the wrapped operation's own errors through unchanged.

pub mod batch;
pub mod config;
pub mod error;
pub mod queue;
pub mod throttle;

pub use batch::{BatchAggregator, BatchRequest, BatchStats, BatchTicket, BatchTransport};
pub use config::{BatchConfig, QueueConfig, ThrottleConfig};
pub use error::DispatchError;
pub use queue::{QueueStats, QueueTicket, RequestQueue};
pub use throttle::{RateThrottle, ThrottleStats};

/// Re-export commonly used types
pub use http::Method;
