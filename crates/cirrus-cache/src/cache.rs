//! TTL cache with capacity-based eviction

use std::{
    collections::HashMap,
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use cirrus_common::{OptimizationStrategy, TuneError, Tunable};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::{CacheMetrics, CacheStats};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used by `set_default` (milliseconds)
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Maximum number of entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Enable metrics collection
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
            enable_metrics: default_enable_metrics(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_entries() -> usize {
    500
}

fn default_enable_metrics() -> bool {
    true
}

/// Interpret a ttl the way older callers pass it
///
/// Values `>= 1` are minutes; smaller positive values are raw milliseconds.
/// Non-finite or non-positive values yield a zero ttl; values too large for a
/// `Duration` saturate to `Duration::MAX`.
pub fn legacy_ttl(ttl: f64) -> Duration {
    if !ttl.is_finite() || ttl <= 0.0 {
        return Duration::ZERO;
    }
    let secs = if ttl >= 1.0 { ttl * 60.0 } else { ttl / 1000.0 };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// A stored value with its write time and lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Unreadable once strictly more than `ttl` has elapsed since the write
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Remaining lifetime, `None` once expired
    pub fn ttl_remaining(&self) -> Option<Duration> {
        let age = Instant::now().saturating_duration_since(self.created_at);
        self.ttl.checked_sub(age)
    }
}

/// Key/value cache with per-entry expiry
///
/// Absence is always a miss; no operation returns an error.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    capacity: AtomicUsize,
    config: CacheConfig,
    metrics: CacheMetrics,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = config.max_entries.max(1);
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: AtomicUsize::new(capacity),
            config,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self::new(CacheConfig::default().with_max_entries(max_entries))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Store or overwrite `key` for `ttl`
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.capacity() {
            self.make_room(&mut entries);
        }

        entries.insert(key, CacheEntry::new(value, ttl));

        if self.config.enable_metrics {
            self.metrics.record_store();
            self.metrics.set_entry_count(entries.len());
        }
    }

    /// Store with the configured default ttl
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.config.default_ttl());
    }

    /// Store using the legacy minutes-or-milliseconds ttl
    pub fn set_legacy(&self, key: impl Into<String>, value: V, ttl: f64) {
        self.set(key, value, legacy_ttl(ttl));
    }

    /// Fresh value for `key`, dropping it if it has expired
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                if self.config.enable_metrics {
                    self.metrics.record_hit();
                }
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            if self.config.enable_metrics {
                self.metrics.record_expiration(1);
                self.metrics.set_entry_count(entries.len());
            }
        }

        if self.config.enable_metrics {
            self.metrics.record_miss();
        }
        None
    }

    /// Same freshness check as `get` without cloning the value
    pub fn has(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return false,
        };

        if expired {
            entries.remove(key);
            if self.config.enable_metrics {
                self.metrics.record_expiration(1);
                self.metrics.set_entry_count(entries.len());
            }
        }
        !expired
    }

    /// Remove `key` regardless of freshness
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.remove(key).is_some();
        if self.config.enable_metrics {
            self.metrics.set_entry_count(entries.len());
        }
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        if self.config.enable_metrics {
            self.metrics.set_entry_count(0);
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let purged = Self::purge_locked(&mut entries);
        if self.config.enable_metrics {
            self.metrics.record_expiration(purged);
            self.metrics.set_entry_count(entries.len());
        }
        purged
    }

    /// Read-through: cached value, or the loader's value cached on success
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = loader().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Number of stored entries, including ones not yet found expired
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Change the capacity, evicting oldest writes if now over it
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        self.capacity.store(capacity, Ordering::Relaxed);

        let mut entries = self.entries.lock();
        if entries.len() > capacity {
            let purged = Self::purge_locked(&mut entries);
            let evicted = Self::evict_oldest(&mut entries, capacity);
            debug!(capacity, purged, evicted, "Cache shrunk");
            if self.config.enable_metrics {
                self.metrics.record_expiration(purged);
                self.metrics.record_eviction(evicted);
                self.metrics.set_entry_count(entries.len());
            }
        }
    }

    fn make_room(&self, entries: &mut HashMap<String, CacheEntry<V>>) {
        let capacity = self.capacity();
        let purged = Self::purge_locked(entries);

        let mut evicted = 0;
        if entries.len() >= capacity {
            let headroom = (capacity / 10).max(1);
            evicted = Self::evict_oldest(entries, capacity.saturating_sub(headroom));
        }

        debug!(capacity, purged, evicted, "Cache eviction pass");
        if self.config.enable_metrics {
            self.metrics.record_expiration(purged);
            self.metrics.record_eviction(evicted);
        }
    }

    fn purge_locked(entries: &mut HashMap<String, CacheEntry<V>>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    fn evict_oldest(entries: &mut HashMap<String, CacheEntry<V>>, target: usize) -> usize {
        if entries.len() <= target {
            return 0;
        }

        let mut by_age: Vec<(Instant, String)> = entries
            .iter()
            .map(|(key, entry)| (entry.created_at, key.clone()))
            .collect();
        by_age.sort();

        let excess = entries.len() - target;
        for (_, key) in by_age.into_iter().take(excess) {
            entries.remove(&key);
        }
        excess
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V: Clone + Send> Tunable for TtlCache<V> {
    fn component(&self) -> &'static str {
        "cache"
    }

    fn apply_parameters(&self, strategy: &OptimizationStrategy) -> Result<(), TuneError> {
        if strategy.cache_capacity == 0 {
            return Err(TuneError::InvalidParameter {
                component: "cache",
                parameter: "cache_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if strategy.cache_capacity != self.capacity() {
            self.set_capacity(strategy.cache_capacity);
        }
        Ok(())
    }

    fn release_resources(&self) {
        let purged = self.purge_expired();
        debug!(purged, "Cache released expired entries");
    }
}
