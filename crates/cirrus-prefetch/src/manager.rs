//! Prefetch manager
//!
//! Records resource accesses, ranks resources by recency and frequency, and
//! warms the cache for the best candidates through the shared request queue at
//! the lowest priority. Each load is paced by the shared rate throttle like any
//! other outbound call. Prefetch failures never reach the caller.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use cirrus_cache::TtlCache;
use cirrus_common::{ApiError, OptimizationStrategy, Priority, TuneError, Tunable};
use cirrus_dispatch::{DispatchError, RateThrottle, RequestQueue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::history::{AccessHistory, AccessRecord};

/// Loads a resource for the cache
#[async_trait]
pub trait ResourceLoader<V>: Send + Sync {
    /// Cache key the loaded value is stored under
    fn cache_key(&self, resource_id: &str) -> String;

    async fn load(&self, resource_id: &str) -> Result<V, ApiError>;
}

/// Prefetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Prefetch loads in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Ranked resources considered per access
    #[serde(default = "default_top_candidates")]
    pub top_candidates: usize,

    /// Always a candidate unless it is the resource being accessed
    #[serde(default = "default_root_resource")]
    pub root_resource: Option<String>,

    /// Lifetime of prefetched cache entries (milliseconds)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_concurrent: default_max_concurrent(),
            top_candidates: default_top_candidates(),
            root_resource: default_root_resource(),
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl PrefetchConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_top_candidates(mut self, top_candidates: usize) -> Self {
        self.top_candidates = top_candidates;
        self
    }

    pub fn with_root_resource(mut self, root: Option<String>) -> Self {
        self.root_resource = root;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    2
}

fn default_top_candidates() -> usize {
    5
}

fn default_root_resource() -> Option<String> {
    Some("/".to_string())
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

/// Prefetch counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchStats {
    /// Accesses recorded
    pub tracked: u64,
    /// Loads added to the prefetch queue
    pub scheduled: u64,
    pub loaded: u64,
    /// Loads that failed or were cancelled
    pub failed: u64,
}

#[derive(Default)]
struct PrefetchState {
    current: Option<String>,
    pending: VecDeque<String>,
    in_flight: HashSet<String>,
}

struct PrefetchInner<V> {
    config: PrefetchConfig,
    cache: Arc<TtlCache<V>>,
    queue: RequestQueue,
    throttle: Arc<RateThrottle>,
    loader: Arc<dyn ResourceLoader<V>>,
    history: Mutex<AccessHistory>,
    state: Mutex<PrefetchState>,
    enabled: AtomicBool,
    max_concurrent: AtomicUsize,
    tracked: AtomicU64,
    scheduled: AtomicU64,
    loaded: AtomicU64,
    failed: AtomicU64,
}

/// Warms the cache for resources likely to be requested next
pub struct PrefetchManager<V> {
    inner: Arc<PrefetchInner<V>>,
}

impl<V> Clone for PrefetchManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> PrefetchManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        config: PrefetchConfig,
        cache: Arc<TtlCache<V>>,
        queue: RequestQueue,
        throttle: Arc<RateThrottle>,
        loader: Arc<dyn ResourceLoader<V>>,
    ) -> Self {
        Self {
            inner: Arc::new(PrefetchInner {
                enabled: AtomicBool::new(config.enabled),
                max_concurrent: AtomicUsize::new(config.max_concurrent.max(1)),
                config,
                cache,
                queue,
                throttle,
                loader,
                history: Mutex::new(AccessHistory::new()),
                state: Mutex::new(PrefetchState::default()),
                tracked: AtomicU64::new(0),
                scheduled: AtomicU64::new(0),
                loaded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Record an access to `resource_id` and schedule prefetches
    pub fn track_access(&self, resource_id: &str) {
        let now = Instant::now();
        self.inner.history.lock().record(resource_id, now);
        self.inner.tracked.fetch_add(1, Ordering::Relaxed);
        self.inner.state.lock().current = Some(resource_id.to_string());

        if !self.is_enabled() {
            return;
        }

        let candidates = self.candidates();
        let mut scheduled = 0u64;
        {
            let mut state = self.inner.state.lock();
            for candidate in candidates {
                let key = self.inner.loader.cache_key(&candidate);
                if self.inner.cache.has(&key)
                    || state.in_flight.contains(&candidate)
                    || state.pending.contains(&candidate)
                {
                    continue;
                }
                state.pending.push_back(candidate);
                scheduled += 1;
            }
        }

        if scheduled > 0 {
            trace!(resource = resource_id, scheduled, "Scheduled prefetch candidates");
            self.inner.scheduled.fetch_add(scheduled, Ordering::Relaxed);
        }
        Self::drain(&self.inner);
    }

    /// Prefetch candidates for the current resource, best first
    ///
    /// Top-ranked resources plus the root resource, minus the current one.
    pub fn candidates(&self) -> Vec<String> {
        let current = self.inner.state.lock().current.clone();
        let mut candidates = self
            .inner
            .history
            .lock()
            .top(Instant::now(), self.inner.config.top_candidates);

        if let Some(root) = &self.inner.config.root_resource {
            if current.as_deref() != Some(root.as_str()) && !candidates.contains(root) {
                candidates.push(root.clone());
            }
        }
        if let Some(current) = current {
            candidates.retain(|candidate| *candidate != current);
        }
        candidates
    }

    pub fn history(&self, resource_id: &str) -> Option<AccessRecord> {
        let mut record = self.inner.history.lock().get(resource_id).cloned()?;
        record.priority_score = record.score_at(Instant::now());
        Some(record)
    }

    /// Candidates waiting for a prefetch slot
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
        let mut state = self.inner.state.lock();
        state.pending.clear();
        state.current = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Turn prefetching on or off; disabling drops waiting candidates
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.inner.state.lock().pending.clear();
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            tracked: self.inner.tracked.load(Ordering::Relaxed),
            scheduled: self.inner.scheduled.load(Ordering::Relaxed),
            loaded: self.inner.loaded.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    /// Start queued prefetches while below the worker ceiling
    fn drain(inner: &Arc<PrefetchInner<V>>) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("Prefetch drain skipped outside a tokio runtime");
                return;
            }
        };

        let ceiling = inner.max_concurrent.load(Ordering::Relaxed).max(1);
        loop {
            let resource_id = {
                let mut state = inner.state.lock();
                if state.in_flight.len() >= ceiling {
                    return;
                }
                match state.pending.pop_front() {
                    Some(resource_id) => {
                        state.in_flight.insert(resource_id.clone());
                        resource_id
                    }
                    None => return,
                }
            };

            let loader = Arc::clone(&inner.loader);
            let throttle = Arc::clone(&inner.throttle);
            let target = resource_id.clone();
            let ticket = inner.queue.enqueue(
                format!("prefetch:{resource_id}"),
                move || async move { throttle.run(|| loader.load(&target)).await },
                Priority::Low,
            );

            let inner = Arc::clone(inner);
            handle.spawn(async move {
                match ticket.await {
                    Ok(value) => {
                        let key = inner.loader.cache_key(&resource_id);
                        inner.cache.set(key, value, inner.config.ttl());
                        inner.loaded.fetch_add(1, Ordering::Relaxed);
                        trace!(resource = %resource_id, "Prefetched resource");
                    }
                    Err(DispatchError::Operation(error)) => {
                        inner.failed.fetch_add(1, Ordering::Relaxed);
                        debug!(resource = %resource_id, error = %error, "Prefetch failed");
                    }
                    Err(error) => {
                        inner.failed.fetch_add(1, Ordering::Relaxed);
                        debug!(resource = %resource_id, error = %error, "Prefetch abandoned");
                    }
                }

                inner.state.lock().in_flight.remove(&resource_id);
                Self::drain(&inner);
            });
        }
    }
}

impl<V> Tunable for PrefetchManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn component(&self) -> &'static str {
        "prefetch"
    }

    /// Background processing doubles the worker ceiling
    fn apply_parameters(&self, strategy: &OptimizationStrategy) -> Result<(), TuneError> {
        let base = self.inner.config.max_concurrent.max(1);
        let ceiling = if strategy.background_processing {
            base * 2
        } else {
            base
        };
        self.inner.max_concurrent.store(ceiling, Ordering::Relaxed);
        Self::drain(&self.inner);
        Ok(())
    }

    fn release_resources(&self) {
        self.inner.state.lock().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CountingLoader {
        loads: Mutex<HashMap<String, u32>>,
    }

    #[async_trait]
    impl ResourceLoader<String> for CountingLoader {
        fn cache_key(&self, resource_id: &str) -> String {
            format!("listing:{resource_id}")
        }

        async fn load(&self, resource_id: &str) -> Result<String, ApiError> {
            *self.loads.lock().entry(resource_id.to_string()).or_default() += 1;
            if resource_id.contains("broken") {
                Err(ApiError::status(500, "listing failed"))
            } else {
                Ok(format!("contents of {resource_id}"))
            }
        }
    }

    fn manager(loader: Arc<CountingLoader>) -> (PrefetchManager<String>, Arc<TtlCache<String>>) {
        let cache = Arc::new(TtlCache::default());
        let manager = PrefetchManager::new(
            PrefetchConfig::default(),
            Arc::clone(&cache),
            RequestQueue::with_max_concurrent(4),
            Arc::new(RateThrottle::with_rate(10_000.0)),
            loader,
        );
        (manager, cache)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_is_prefetched_on_first_access() {
        let loader = Arc::new(CountingLoader::default());
        let (manager, cache) = manager(Arc::clone(&loader));

        manager.track_access("/docs");
        settle().await;

        assert_eq!(cache.get("listing:/").as_deref(), Some("contents of /"));
        assert!(cache.get("listing:/docs").is_none());
        assert_eq!(manager.stats().loaded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_candidates_are_not_reloaded() {
        let loader = Arc::new(CountingLoader::default());
        let (manager, _cache) = manager(Arc::clone(&loader));

        manager.track_access("/a");
        settle().await;
        manager.track_access("/b");
        settle().await;
        manager.track_access("/c");
        settle().await;

        let loads = loader.loads.lock();
        assert!(loads.values().all(|&count| count == 1), "{loads:?}");
        assert_eq!(loads.get("/a"), Some(&1));
        assert_eq!(loads.get("/b"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed() {
        let loader = Arc::new(CountingLoader::default());
        let (manager, cache) = manager(Arc::clone(&loader));

        manager.track_access("/broken");
        manager.track_access("/next");
        settle().await;

        assert_eq!(manager.stats().failed, 1);
        assert!(cache.get("listing:/broken").is_none());
        assert_eq!(manager.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_ceiling_bounds_in_flight() {
        let loader = Arc::new(CountingLoader::default());
        let (manager, _cache) = manager(Arc::clone(&loader));
        manager.set_enabled(false);
        for id in ["/1", "/2", "/3", "/4", "/5"] {
            manager.track_access(id);
        }
        manager.set_enabled(true);

        manager.track_access("/6");
        assert!(manager.in_flight_len() <= 2);
        assert!(manager.pending_len() > 0);

        settle().await;
        assert_eq!(manager.pending_len(), 0);
        assert_eq!(manager.stats().loaded, manager.stats().scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_manager_only_records_history() {
        let loader = Arc::new(CountingLoader::default());
        let (manager, _cache) = manager(Arc::clone(&loader));
        manager.set_enabled(false);

        manager.track_access("/a");
        manager.track_access("/a");
        settle().await;

        assert_eq!(manager.history("/a").unwrap().access_count, 2);
        assert!(loader.loads.lock().is_empty());
        assert_eq!(manager.stats().scheduled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidates_exclude_current() {
        let loader = Arc::new(CountingLoader::default());
        let (manager, _cache) = manager(loader);
        manager.set_enabled(false);

        manager.track_access("/");
        manager.track_access("/x");
        let candidates = manager.candidates();
        assert!(candidates.contains(&"/".to_string()));
        assert!(!candidates.contains(&"/x".to_string()));

        manager.clear_history();
        assert!(manager.history("/x").is_none());
    }

    #[derive(Default)]
    struct StampingLoader {
        starts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl ResourceLoader<String> for StampingLoader {
        fn cache_key(&self, resource_id: &str) -> String {
            format!("listing:{resource_id}")
        }

        async fn load(&self, resource_id: &str) -> Result<String, ApiError> {
            self.starts.lock().push(Instant::now());
            Ok(resource_id.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loads_are_paced_by_throttle() {
        let loader = Arc::new(StampingLoader::default());
        let throttle = Arc::new(RateThrottle::with_rate(2.0));
        let manager = PrefetchManager::new(
            PrefetchConfig::default().with_max_concurrent(4),
            Arc::new(TtlCache::default()),
            RequestQueue::with_max_concurrent(4),
            Arc::clone(&throttle),
            Arc::clone(&loader) as Arc<dyn ResourceLoader<String>>,
        );

        manager.track_access("/a");
        manager.track_access("/b");
        manager.track_access("/c");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let starts = loader.starts.lock();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
        assert_eq!(throttle.stats().dispatched, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_processing_widens_ceiling() {
        let loader = Arc::new(CountingLoader::default());
        let (manager, _cache) = manager(loader);

        let strategy = OptimizationStrategy {
            background_processing: true,
            ..Default::default()
        };
        manager.apply_parameters(&strategy).unwrap();
        assert_eq!(manager.max_concurrent(), 4);

        manager.apply_parameters(&OptimizationStrategy::default()).unwrap();
        assert_eq!(manager.max_concurrent(), 2);
    }
}
