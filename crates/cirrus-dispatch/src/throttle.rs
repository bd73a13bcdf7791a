//! Rate throttle pacing dispatch starts

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use cirrus_common::{OptimizationStrategy, TuneError, Tunable};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};
use tracing::trace;

use crate::config::{interval_for_rate, saturating_nanos, ThrottleConfig};

/// Throttle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleStats {
    /// Operations dispatched
    pub dispatched: u64,
    /// Operations that had to wait for their slot
    pub delayed: u64,
    /// Sum of pacing waits (milliseconds)
    pub total_wait_ms: u64,
}

struct ThrottleState {
    last_dispatch: Option<Instant>,
}

/// Serialises dispatch so consecutive starts are at least `min_interval` apart
///
/// Waiters are served in FIFO order (the state lock is fair). Only the start
/// of each operation is paced; the next caller does not wait for the previous
/// operation to complete, and an operation's failure reaches only its own
/// caller.
pub struct RateThrottle {
    state: Mutex<ThrottleState>,
    rate_interval_ns: AtomicU64,
    floor_interval_ns: AtomicU64,
    dispatched: AtomicU64,
    delayed: AtomicU64,
    total_wait_us: AtomicU64,
}

impl RateThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                last_dispatch: None,
            }),
            rate_interval_ns: AtomicU64::new(saturating_nanos(config.min_interval())),
            floor_interval_ns: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            delayed: AtomicU64::new(0),
            total_wait_us: AtomicU64::new(0),
        }
    }

    pub fn with_rate(max_requests_per_second: f64) -> Self {
        Self::new(ThrottleConfig::new(max_requests_per_second))
    }

    /// Effective spacing: the larger of the rate-derived and tuned intervals
    pub fn min_interval(&self) -> Duration {
        let rate = self.rate_interval_ns.load(Ordering::Relaxed);
        let floor = self.floor_interval_ns.load(Ordering::Relaxed);
        Duration::from_nanos(rate.max(floor))
    }

    /// Change the allowed dispatches per second
    pub fn set_rate(&self, max_requests_per_second: f64) {
        let interval = interval_for_rate(max_requests_per_second);
        self.rate_interval_ns
            .store(saturating_nanos(interval), Ordering::Relaxed);
    }

    /// Minimum spacing imposed by the optimizer on top of the rate
    pub fn set_min_delay(&self, delay: Duration) {
        self.floor_interval_ns
            .store(saturating_nanos(delay), Ordering::Relaxed);
    }

    /// Wait for a dispatch slot, then run `operation`
    pub async fn run<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire_slot().await;
        operation().await
    }

    /// Wait until the next dispatch may start and claim it
    pub async fn acquire_slot(&self) {
        let mut state = self.state.lock().await;
        let interval = self.min_interval();

        if let Some(last) = state.last_dispatch {
            let since_last = Instant::now().saturating_duration_since(last);
            if let Some(wait) = interval.checked_sub(since_last).filter(|w| !w.is_zero()) {
                trace!(wait_ms = wait.as_millis() as u64, "Throttle delaying dispatch");
                tokio::time::sleep(wait).await;
                self.delayed.fetch_add(1, Ordering::Relaxed);
                self.total_wait_us
                    .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
            }
        }

        state.last_dispatch = Some(Instant::now());
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_us.load(Ordering::Relaxed) / 1000,
        }
    }
}

impl Default for RateThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

impl Tunable for RateThrottle {
    fn component(&self) -> &'static str {
        "throttle"
    }

    fn apply_parameters(&self, strategy: &OptimizationStrategy) -> Result<(), TuneError> {
        self.set_min_delay(strategy.inter_request_delay());
        Ok(())
    }
}
