//! Cache performance monitoring and metrics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that returned a fresh value
    pub hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Entries dropped because their ttl elapsed
    pub expirations: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Writes, including overwrites
    pub stores: u64,
    /// Entries currently stored
    pub entry_count: usize,
}

impl CacheStats {
    /// Hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Miss rate as a percentage (0.0 to 100.0)
    pub fn miss_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            100.0 - self.hit_rate()
        }
    }
}

/// Thread-safe cache metrics tracker
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    stores: AtomicU64,
    entry_count: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_entry_count(&self, count: usize) {
        self.entry_count.store(count as u64, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            entry_count: self.entry_count.load(Ordering::Relaxed) as usize,
        }
    }

    /// Reset all counters except the live entry count
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.stores.store(0, Ordering::Relaxed);
    }

    /// Get a formatted summary of cache metrics
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Cache Metrics:\n  Hits: {}\n  Misses: {}\n  Hit Rate: {:.2}%\n  Expirations: {}\n  Evictions: {}\n  Entries: {}",
            stats.hits,
            stats.misses,
            stats.hit_rate(),
            stats.expirations,
            stats.evictions,
            stats.entry_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(stats.miss_rate(), 25.0);
    }

    #[test]
    fn test_empty_stats_rates() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 0.0);
    }

    #[test]
    fn test_metrics_record_and_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_eviction(3);
        metrics.set_entry_count(7);

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.entry_count, 7);

        metrics.reset();
        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.entry_count, 7);
    }

    #[test]
    fn test_summary_mentions_hit_rate() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        assert!(metrics.summary().contains("Hit Rate: 100.00%"));
    }
}
