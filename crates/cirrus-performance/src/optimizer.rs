//! Closed-loop resource optimizer
//!
//! Periodically derives a strategy from the immutable baseline and the current
//! telemetry, and pushes it to every registered `Tunable` when it changes.

use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use cirrus_common::{OptimizationStrategy, ResourceEvent, Tunable};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    monitor::{PerformanceMonitor, TelemetrySnapshot},
    rules::{apply_floors, AdjustmentRule, ErrorRateRule, LatencyRule, MemoryPressureRule, UserActivityRule},
};

const MB: u64 = 1024 * 1024;

/// Optimizer thresholds and schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Memory above which resource usage shrinks (MB)
    #[serde(default = "default_high_water_mb")]
    pub high_water_mb: u64,

    /// Memory below which resource usage grows (MB)
    #[serde(default = "default_low_water_mb")]
    pub low_water_mb: u64,

    /// Memory above which resource usage shrinks hard (MB)
    #[serde(default = "default_critical_mb")]
    pub critical_mb: u64,

    /// Memory above which a cleanup pass runs (MB)
    #[serde(default = "default_gc_threshold_mb")]
    pub gc_threshold_mb: u64,

    #[serde(default = "default_slow_latency_ms")]
    pub slow_latency_ms: u64,

    #[serde(default = "default_fast_latency_ms")]
    pub fast_latency_ms: u64,

    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Time between optimization cycles (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Delay before the first cycle after `start` (milliseconds)
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Optimization reports kept
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            high_water_mb: default_high_water_mb(),
            low_water_mb: default_low_water_mb(),
            critical_mb: default_critical_mb(),
            gc_threshold_mb: default_gc_threshold_mb(),
            slow_latency_ms: default_slow_latency_ms(),
            fast_latency_ms: default_fast_latency_ms(),
            error_rate_threshold: default_error_rate_threshold(),
            interval_ms: default_interval_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            history_len: default_history_len(),
        }
    }
}

impl OptimizerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn gc_threshold_bytes(&self) -> u64 {
        self.gc_threshold_mb * MB
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay_ms = delay.as_millis() as u64;
        self
    }

    /// The default rule set built from these thresholds
    pub fn default_rules(&self) -> Vec<Box<dyn AdjustmentRule>> {
        vec![
            Box::new(MemoryPressureRule {
                low_water_bytes: self.low_water_mb * MB,
                high_water_bytes: self.high_water_mb * MB,
                critical_bytes: self.critical_mb * MB,
            }),
            Box::new(LatencyRule {
                slow_ms: self.slow_latency_ms as f64,
                fast_ms: self.fast_latency_ms as f64,
            }),
            Box::new(ErrorRateRule {
                threshold: self.error_rate_threshold,
            }),
            Box::new(UserActivityRule),
        ]
    }
}

// Default value functions for serde
fn default_high_water_mb() -> u64 {
    200
}

fn default_low_water_mb() -> u64 {
    50
}

fn default_critical_mb() -> u64 {
    400
}

fn default_gc_threshold_mb() -> u64 {
    300
}

fn default_slow_latency_ms() -> u64 {
    2_000
}

fn default_fast_latency_ms() -> u64 {
    200
}

fn default_error_rate_threshold() -> f64 {
    0.1
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_startup_delay_ms() -> u64 {
    2_000
}

fn default_history_len() -> usize {
    20
}

/// Record of one optimization cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub timestamp: DateTime<Utc>,
    pub telemetry: TelemetrySnapshot,
    pub previous: OptimizationStrategy,
    pub strategy: OptimizationStrategy,
    /// Whether the strategy was replaced
    pub changed: bool,
    pub changed_fields: Vec<String>,
    pub rules_applied: Vec<String>,
    /// Components that rejected the new strategy
    pub failed_components: Vec<String>,
    pub cleanup_triggered: bool,
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Derives and distributes operating parameters from live telemetry
pub struct ResourceOptimizer {
    config: OptimizerConfig,
    monitor: Arc<PerformanceMonitor>,
    baseline: OptimizationStrategy,
    current: RwLock<Arc<OptimizationStrategy>>,
    rules: Vec<Box<dyn AdjustmentRule>>,
    components: RwLock<Vec<Arc<dyn Tunable>>>,
    history: Mutex<VecDeque<OptimizationReport>>,
    events: broadcast::Sender<ResourceEvent>,
    task: Mutex<Option<RunningTask>>,
}

impl ResourceOptimizer {
    pub fn new(
        config: OptimizerConfig,
        baseline: OptimizationStrategy,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        let rules = config.default_rules();
        Self::with_rules(config, baseline, monitor, rules)
    }

    pub fn with_rules(
        config: OptimizerConfig,
        baseline: OptimizationStrategy,
        monitor: Arc<PerformanceMonitor>,
        rules: Vec<Box<dyn AdjustmentRule>>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            monitor,
            current: RwLock::new(Arc::new(baseline.clone())),
            baseline,
            rules,
            components: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            events,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Add a component and bring it to the current strategy
    pub fn register(&self, component: Arc<dyn Tunable>) {
        let strategy = self.get_current_strategy();
        if let Err(e) = component.apply_parameters(&strategy) {
            error!(component = component.component(), error = %e, "Failed to apply initial strategy");
        }
        debug!(component = component.component(), "Registered tunable component");
        self.components.write().push(component);
    }

    pub fn registered_components(&self) -> Vec<&'static str> {
        self.components.read().iter().map(|c| c.component()).collect()
    }

    /// Derive a strategy for `telemetry` from the baseline
    ///
    /// Pure: nothing is applied. Returns the strategy and the names of the
    /// rules that changed something.
    pub fn optimize_for(&self, telemetry: &TelemetrySnapshot) -> (OptimizationStrategy, Vec<&'static str>) {
        let mut strategy = self.baseline.clone();
        let mut applied = Vec::new();
        for rule in &self.rules {
            if rule.adjust(telemetry, &mut strategy) {
                applied.push(rule.name());
            }
        }
        apply_floors(&mut strategy);
        (strategy, applied)
    }

    /// Run one optimization cycle now on a fresh telemetry snapshot
    pub fn force_optimization(&self) -> OptimizationReport {
        let telemetry = self.monitor.snapshot();
        self.optimize_with(telemetry)
    }

    /// Run one optimization cycle on the given telemetry
    pub fn optimize_with(&self, telemetry: TelemetrySnapshot) -> OptimizationReport {
        let (strategy, rules_applied) = self.optimize_for(&telemetry);
        let previous = self.get_current_strategy();
        let changed = strategy != *previous;
        let changed_fields: Vec<String> = previous.diff(&strategy).into_iter().map(String::from).collect();

        let mut failed_components = Vec::new();
        if changed {
            let next = Arc::new(strategy.clone());
            *self.current.write() = Arc::clone(&next);
            info!(
                changed = ?changed_fields,
                rules = ?rules_applied,
                memory_mb = telemetry.memory_mb() as u64,
                "Optimization strategy updated"
            );
            failed_components = self.distribute(&next);
            let _ = self.events.send(ResourceEvent::StrategyChanged(next));
        }

        let cleanup_triggered = telemetry.memory_bytes > self.config.gc_threshold_bytes();
        if cleanup_triggered {
            self.cleanup(telemetry.memory_bytes);
        }

        let report = OptimizationReport {
            timestamp: Utc::now(),
            telemetry,
            previous: (*previous).clone(),
            strategy,
            changed,
            changed_fields,
            rules_applied: rules_applied.into_iter().map(String::from).collect(),
            failed_components,
            cleanup_triggered,
        };

        let mut history = self.history.lock();
        if history.len() >= self.config.history_len.max(1) {
            history.pop_front();
        }
        history.push_back(report.clone());
        report
    }

    /// Push `strategy` to every component; failures are logged, not propagated
    fn distribute(&self, strategy: &OptimizationStrategy) -> Vec<String> {
        let components = self.components.read().clone();
        let mut failed = Vec::new();
        for component in components {
            if let Err(e) = component.apply_parameters(strategy) {
                error!(component = component.component(), error = %e, "Failed to apply strategy");
                failed.push(component.component().to_string());
            }
        }
        failed
    }

    fn cleanup(&self, memory_bytes: u64) {
        info!(memory_mb = memory_bytes / MB, "Memory above cleanup threshold, releasing resources");
        let components = self.components.read().clone();
        for component in components {
            component.release_resources();
        }
        self.monitor.clear_operations();
        let _ = self.events.send(ResourceEvent::FreeResources { memory_bytes });
    }

    pub fn get_current_strategy(&self) -> Arc<OptimizationStrategy> {
        self.current.read().clone()
    }

    pub fn baseline(&self) -> &OptimizationStrategy {
        &self.baseline
    }

    /// Most recent reports, oldest first
    pub fn history(&self) -> Vec<OptimizationReport> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }

    /// Spawn the scheduled optimization task
    ///
    /// Runs once after the startup delay, then on every interval until
    /// `stop`. Returns false if the task is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Resource optimizer already running");
            return false;
        }

        let token = CancellationToken::new();
        let weak: Weak<Self> = Arc::downgrade(self);
        let startup_delay = self.config.startup_delay();
        let interval = self.config.interval();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut wait = startup_delay;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                match weak.upgrade() {
                    Some(optimizer) => {
                        optimizer.force_optimization();
                    }
                    None => break,
                }
                wait = interval;
            }
            debug!("Resource optimizer task stopped");
        });

        info!(
            interval_ms = interval.as_millis() as u64,
            startup_delay_ms = startup_delay.as_millis() as u64,
            "Resource optimizer started"
        );
        *task = Some(RunningTask { token, handle });
        true
    }

    /// Cancel the scheduled task and wait for it to finish
    pub async fn stop(&self) {
        let running = self.task.lock().take();
        if let Some(RunningTask { token, handle }) = running {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Resource optimizer task ended abnormally");
            }
            info!("Resource optimizer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}
