//! Per-session resource management facade
//!
//! A `ResourceSession` owns one instance of every component and wires them
//! together: calls pass through the cache, then the queue, the throttle and
//! the recovery engine before reaching the caller's operation. The tunable
//! components are registered with the session's optimizer on construction.

use std::{convert::Infallible, fmt, future::Future, pin::Pin, sync::Arc};

use cirrus_cache::TtlCache;
use cirrus_common::{Priority, Tunable};
use cirrus_dispatch::{BatchAggregator, BatchTransport, DispatchError, RateThrottle, RequestQueue};
use cirrus_performance::{
    MemorySource, OptimizationReport, PerformanceMonitor, ResourceOptimizer, SysinfoMemory,
};
use cirrus_prefetch::{PrefetchManager, ResourceLoader};
use cirrus_recovery::{RecoveryEngine, RecoveryOptions, RecoveryPath};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{CirrusConfig, Result as ConfigResult};

/// Failure of a session fetch
#[derive(Debug, Error)]
pub enum FetchError<E> {
    /// A newer request with the same id replaced this one before it ran
    #[error("request '{id}' was superseded")]
    Cancelled { id: String },

    /// The session shut down before the request ran
    #[error("session is shut down")]
    Closed,

    /// The operation failed after recovery was exhausted
    #[error("{error} (after {attempts} attempts)")]
    Failed {
        error: E,
        attempts: u32,
        path: RecoveryPath,
    },
}

impl<E> FetchError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }

    /// The operation error, if the operation ran and failed
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            FetchError::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Builder for [`ResourceSession`]
pub struct ResourceSessionBuilder<V> {
    config: CirrusConfig,
    transport: Option<Arc<dyn BatchTransport>>,
    loader: Option<Arc<dyn ResourceLoader<V>>>,
    memory_source: Option<Arc<dyn MemorySource>>,
}

impl<V> ResourceSessionBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            config: CirrusConfig::default(),
            transport: None,
            loader: None,
            memory_source: None,
        }
    }

    pub fn config(mut self, config: CirrusConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable request batching over this transport
    pub fn transport(mut self, transport: Arc<dyn BatchTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Enable prefetching with this loader
    pub fn loader(mut self, loader: Arc<dyn ResourceLoader<V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Memory source for telemetry; defaults to the process RSS
    pub fn memory_source(mut self, memory: Arc<dyn MemorySource>) -> Self {
        self.memory_source = Some(memory);
        self
    }

    /// Validate the configuration and construct every component
    pub fn build(self) -> ConfigResult<ResourceSession<V>> {
        let config = self.config;
        config.validate()?;

        let memory = self
            .memory_source
            .unwrap_or_else(|| Arc::new(SysinfoMemory::new()));
        let monitor = Arc::new(PerformanceMonitor::with_memory_source(config.monitor.clone(), memory));

        let cache = Arc::new(TtlCache::new(config.cache.clone()));
        let throttle = Arc::new(RateThrottle::new(config.throttle.clone()));
        let queue = RequestQueue::new(config.queue.clone());
        let recovery = Arc::new(
            RecoveryEngine::new(config.retry.clone()).with_bulk_config(config.bulk.clone()),
        );
        let batch = self
            .transport
            .map(|transport| BatchAggregator::new(transport, config.batch.clone()));
        let prefetch = self.loader.map(|loader| {
            PrefetchManager::new(
                config.prefetch.clone(),
                Arc::clone(&cache),
                queue.clone(),
                Arc::clone(&throttle),
                loader,
            )
        });

        let optimizer = Arc::new(ResourceOptimizer::new(
            config.optimizer.clone(),
            config.baseline_strategy(),
            Arc::clone(&monitor),
        ));
        optimizer.register(Arc::clone(&cache) as Arc<dyn Tunable>);
        optimizer.register(Arc::clone(&throttle) as Arc<dyn Tunable>);
        optimizer.register(Arc::new(queue.clone()));
        optimizer.register(Arc::clone(&recovery) as Arc<dyn Tunable>);
        if let Some(batch) = &batch {
            optimizer.register(Arc::new(batch.clone()));
        }
        if let Some(prefetch) = &prefetch {
            optimizer.register(Arc::new(prefetch.clone()));
        }

        debug!(
            components = ?optimizer.registered_components(),
            "Resource session built"
        );

        Ok(ResourceSession {
            config,
            cache,
            throttle,
            queue,
            batch,
            recovery,
            prefetch,
            monitor,
            optimizer,
        })
    }
}

impl<V> Default for ResourceSessionBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// One set of cooperating resource-management components
pub struct ResourceSession<V> {
    config: CirrusConfig,
    cache: Arc<TtlCache<V>>,
    throttle: Arc<RateThrottle>,
    queue: RequestQueue,
    batch: Option<BatchAggregator>,
    recovery: Arc<RecoveryEngine>,
    prefetch: Option<PrefetchManager<V>>,
    monitor: Arc<PerformanceMonitor>,
    optimizer: Arc<ResourceOptimizer>,
}

impl<V> fmt::Debug for ResourceSession<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSession")
            .field("batching", &self.batch.is_some())
            .field("prefetching", &self.prefetch.is_some())
            .field("optimizer_running", &self.optimizer.is_running())
            .finish()
    }
}

impl<V> ResourceSession<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn builder() -> ResourceSessionBuilder<V> {
        ResourceSessionBuilder::new()
    }

    /// Return the cached value for `key`, or run `operation` to produce it
    ///
    /// `id` identifies the call in the queue; a later fetch with the same id
    /// supersedes this one while it is still pending. Statistics are kept
    /// under the key's kind, the part before the first `:` (`"list"` for
    /// `"list:/docs"`), so they stay bounded however many keys are fetched.
    pub async fn fetch<F, Fut, E>(
        &self,
        key: &str,
        id: impl Into<String>,
        priority: Priority,
        operation: F,
    ) -> Result<V, FetchError<E>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let options = RecoveryOptions::new(operation_kind(key));
        self.fetch_with(key, id, priority, operation, options).await
    }

    /// `fetch` with explicit recovery options (retry override, fallback)
    ///
    /// Latency is recorded per attempt of `operation`; backoff between
    /// attempts is not counted.
    pub async fn fetch_with<F, Fut, E>(
        &self,
        key: &str,
        id: impl Into<String>,
        priority: Priority,
        operation: F,
        options: RecoveryOptions<V, E>,
    ) -> Result<V, FetchError<E>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if let Some(value) = self.cache.get(key) {
            return Ok(value);
        }

        let throttle = Arc::clone(&self.throttle);
        let recovery = Arc::clone(&self.recovery);
        let monitor = Arc::clone(&self.monitor);

        let ticket = self.queue.enqueue(
            id,
            move || async move {
                let outcome = throttle
                    .run(move || async move {
                        let name = options.operation_name.clone();
                        let timed = timed_attempts(operation, Arc::clone(&monitor), name.clone());
                        let outcome = recovery.execute_with_recovery(timed, options).await;
                        if outcome.success() {
                            monitor.record_success(&name);
                        } else {
                            monitor.record_error(&name);
                        }
                        outcome
                    })
                    .await;
                Ok::<_, Infallible>(outcome)
            },
            priority,
        );

        let outcome = match ticket.await {
            Ok(outcome) => outcome,
            Err(DispatchError::Cancelled { id }) => return Err(FetchError::Cancelled { id }),
            Err(DispatchError::Closed) => return Err(FetchError::Closed),
            Err(DispatchError::Operation(never)) => match never {},
        };

        let attempts = outcome.attempts;
        let path = outcome.recovery_path;
        match outcome.into_result() {
            Ok(value) => {
                self.cache.set_default(key, value.clone());
                self.monitor.set_cache_size(self.cache.len());
                Ok(value)
            }
            Err(error) => Err(FetchError::Failed {
                error,
                attempts,
                path,
            }),
        }
    }

    /// Record a user interaction with `resource_id`
    pub fn track_access(&self, resource_id: &str) {
        self.monitor.record_user_activity();
        if let Some(prefetch) = &self.prefetch {
            prefetch.track_access(resource_id);
        }
    }

    /// Start the scheduled optimizer; false if already running
    pub fn start(&self) -> bool {
        let started = self.optimizer.start();
        if started {
            info!("Resource session started");
        }
        started
    }

    /// Run one optimization cycle now
    pub fn force_optimization(&self) -> OptimizationReport {
        self.optimizer.force_optimization()
    }

    /// Stop the optimizer, flush pending batches and close the queue
    pub async fn shutdown(&self) {
        self.optimizer.stop().await;
        if let Some(batch) = &self.batch {
            batch.flush().await;
        }
        self.queue.shutdown();
        info!("Resource session shut down");
    }

    pub fn config(&self) -> &CirrusConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TtlCache<V>> {
        &self.cache
    }

    pub fn throttle(&self) -> &Arc<RateThrottle> {
        &self.throttle
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Present when the session was built with a transport
    pub fn batch(&self) -> Option<&BatchAggregator> {
        self.batch.as_ref()
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    /// Present when the session was built with a loader
    pub fn prefetch(&self) -> Option<&PrefetchManager<V>> {
        self.prefetch.as_ref()
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn optimizer(&self) -> &Arc<ResourceOptimizer> {
        &self.optimizer
    }
}

/// Statistics label for a cache key: its prefix before the first `:`
fn operation_kind(key: &str) -> &str {
    match key.split_once(':') {
        Some((kind, _)) if !kind.is_empty() => kind,
        _ => "fetch",
    }
}

/// Wrap `operation` so each attempt's own duration is recorded under `name`
fn timed_attempts<F, Fut, T, E>(
    mut operation: F,
    monitor: Arc<PerformanceMonitor>,
    name: String,
) -> impl FnMut() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    move || {
        let attempt = operation();
        let monitor = Arc::clone(&monitor);
        let name = name.clone();
        Box::pin(async move {
            let started = Instant::now();
            let result = attempt.await;
            monitor.record_latency(&name, started.elapsed());
            result
        })
    }
}
