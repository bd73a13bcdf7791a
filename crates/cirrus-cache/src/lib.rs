//! # Cirrus Cache
//!
//! In-process cache for remote API responses with per-entry expiry and
//! capacity-based eviction.
//!
//! ## Features
//!
//! - **Lazy expiry**: entries are checked on read and dropped once stale
//! - **Capacity policy**: expired entries are purged first, then the oldest
//!   writes are evicted until a small headroom is restored
//! - **Metrics**: hit/miss/eviction counters with snapshots
//! - **Runtime tuning**: capacity follows the optimizer's strategy

pub mod cache;
pub mod metrics;

pub use cache::{legacy_ttl, CacheConfig, CacheEntry, TtlCache};
pub use metrics::{CacheMetrics, CacheStats};
