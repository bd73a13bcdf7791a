//! Performance monitoring and telemetry snapshots

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

use crate::memory::{MemorySource, SysinfoMemory};

/// Interaction level over the trailing activity window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserActivity {
    Low,
    #[default]
    Normal,
    High,
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Latency and outcome samples kept
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Trailing window for user activity (milliseconds)
    #[serde(default = "default_activity_window_ms")]
    pub activity_window_ms: u64,

    /// Fewer interactions than this in the window is low activity
    #[serde(default = "default_low_activity_threshold")]
    pub low_activity_threshold: usize,

    /// At least this many interactions in the window is high activity
    #[serde(default = "default_high_activity_threshold")]
    pub high_activity_threshold: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            activity_window_ms: default_activity_window_ms(),
            low_activity_threshold: default_low_activity_threshold(),
            high_activity_threshold: default_high_activity_threshold(),
        }
    }
}

impl MonitorConfig {
    pub fn activity_window(&self) -> Duration {
        Duration::from_millis(self.activity_window_ms)
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_activity_thresholds(mut self, low: usize, high: usize) -> Self {
        self.low_activity_threshold = low;
        self.high_activity_threshold = high;
        self
    }
}

fn default_window_size() -> usize {
    200
}

fn default_activity_window_ms() -> u64 {
    60_000
}

fn default_low_activity_threshold() -> usize {
    2
}

fn default_high_activity_threshold() -> usize {
    30
}

/// Point-in-time telemetry read by the optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub memory_bytes: u64,
    /// Mean over the sample window; zero without samples
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Failed fraction of the outcome window
    pub error_rate: f64,
    pub cache_size: usize,
    pub user_activity: UserActivity,
    /// Outcomes recorded since creation or reset
    pub total_requests: u64,
}

impl TelemetrySnapshot {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Per-operation totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub calls: u64,
    pub errors: u64,
    pub total_latency_ms: f64,
}

impl OperationMetrics {
    pub fn mean_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ms / self.calls as f64
        }
    }
}

/// Distinct operation names kept before the least used is evicted
pub const MAX_TRACKED_OPERATIONS: usize = 256;

#[derive(Default)]
struct MonitorState {
    latencies: VecDeque<Duration>,
    outcomes: VecDeque<bool>,
    interactions: VecDeque<Instant>,
    operations: HashMap<String, OperationMetrics>,
    total_requests: u64,
}

/// Collects latency, outcome and activity samples over bounded windows
pub struct PerformanceMonitor {
    config: MonitorConfig,
    memory: Arc<dyn MemorySource>,
    state: Mutex<MonitorState>,
    cache_size: AtomicUsize,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_memory_source(config, Arc::new(SysinfoMemory::new()))
    }

    pub fn with_memory_source(config: MonitorConfig, memory: Arc<dyn MemorySource>) -> Self {
        Self {
            config,
            memory,
            state: Mutex::new(MonitorState::default()),
            cache_size: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn record_latency(&self, name: &str, latency: Duration) {
        let window = self.config.window_size.max(1);
        let mut state = self.state.lock();
        if state.latencies.len() >= window {
            state.latencies.pop_front();
        }
        state.latencies.push_back(latency);
        Self::operation_entry(&mut state, name).total_latency_ms += latency.as_secs_f64() * 1000.0;
        trace!(operation = name, latency_ms = latency.as_millis() as u64, "Recorded latency");
    }

    pub fn record_success(&self, name: &str) {
        self.record_outcome(name, true);
    }

    pub fn record_error(&self, name: &str) {
        self.record_outcome(name, false);
    }

    fn record_outcome(&self, name: &str, ok: bool) {
        let window = self.config.window_size.max(1);
        let mut state = self.state.lock();
        if state.outcomes.len() >= window {
            state.outcomes.pop_front();
        }
        state.outcomes.push_back(ok);
        state.total_requests += 1;

        let operation = Self::operation_entry(&mut state, name);
        operation.calls += 1;
        if !ok {
            operation.errors += 1;
        }
    }

    /// Count one user interaction
    pub fn record_user_activity(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.interactions.push_back(now);
        Self::expire_interactions(&mut state, now, self.config.activity_window());
    }

    pub fn set_cache_size(&self, entries: usize) {
        self.cache_size.store(entries, Ordering::Relaxed);
    }

    /// Await `future`, recording its latency and outcome under `name`
    pub async fn instrument<F, T, E>(&self, name: &str, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = future.await;
        self.record_latency(name, start.elapsed());
        match &result {
            Ok(_) => self.record_success(name),
            Err(_) => self.record_error(name),
        }
        result
    }

    pub fn user_activity(&self) -> UserActivity {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::expire_interactions(&mut state, now, self.config.activity_window());

        let count = state.interactions.len();
        if count < self.config.low_activity_threshold {
            UserActivity::Low
        } else if count >= self.config.high_activity_threshold {
            UserActivity::High
        } else {
            UserActivity::Normal
        }
    }

    pub fn operation(&self, name: &str) -> Option<OperationMetrics> {
        self.state.lock().operations.get(name).cloned()
    }

    /// Distinct operation names currently tracked
    pub fn operation_count(&self) -> usize {
        self.state.lock().operations.len()
    }

    /// Drop per-operation totals, keeping the sample windows
    pub fn clear_operations(&self) {
        self.state.lock().operations.clear();
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let user_activity = self.user_activity();
        let memory_bytes = self.memory.memory_bytes();
        let state = self.state.lock();

        let mut latencies_ms: Vec<f64> = state
            .latencies
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        latencies_ms.sort_by(|a, b| a.total_cmp(b));

        let mean_latency_ms = if latencies_ms.is_empty() {
            0.0
        } else {
            latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64
        };
        let p95_latency_ms = percentile(&latencies_ms, 0.95);

        let error_rate = if state.outcomes.is_empty() {
            0.0
        } else {
            state.outcomes.iter().filter(|ok| !**ok).count() as f64 / state.outcomes.len() as f64
        };

        TelemetrySnapshot {
            timestamp: Utc::now(),
            memory_bytes,
            mean_latency_ms,
            p95_latency_ms,
            error_rate,
            cache_size: self.cache_size.load(Ordering::Relaxed),
            user_activity,
            total_requests: state.total_requests,
        }
    }

    /// Drop every sample and counter
    pub fn reset(&self) {
        *self.state.lock() = MonitorState::default();
        self.cache_size.store(0, Ordering::Relaxed);
    }

    fn operation_entry<'a>(state: &'a mut MonitorState, name: &str) -> &'a mut OperationMetrics {
        if !state.operations.contains_key(name) && state.operations.len() >= MAX_TRACKED_OPERATIONS {
            let victim = state
                .operations
                .iter()
                .min_by_key(|(_, metrics)| metrics.calls)
                .map(|(name, _)| name.clone());
            if let Some(victim) = victim {
                state.operations.remove(&victim);
            }
        }
        state.operations.entry(name.to_string()).or_default()
    }

    fn expire_interactions(state: &mut MonitorState, now: Instant, window: Duration) {
        while let Some(&oldest) = state.interactions.front() {
            if now.saturating_duration_since(oldest) > window {
                state.interactions.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Nearest-rank percentile of sorted samples
fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
