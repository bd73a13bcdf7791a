//! Access-pattern driven prefetching
//!
//! Every access updates a per-resource history entry scored as
//! `0.7 * recency + 0.3 * frequency`. The best-ranked resources (plus the
//! root resource) that are neither cached nor already scheduled are loaded in
//! the background at low priority and stored in the cache.

pub mod history;
pub mod manager;

pub use history::{priority_score, AccessHistory, AccessRecord};
pub use manager::{PrefetchConfig, PrefetchManager, PrefetchStats, ResourceLoader};
