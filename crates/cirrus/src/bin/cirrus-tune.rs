// cirrus-tune: inspect configuration and preview optimizer decisions

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use cirrus::{
    performance::{
        FixedMemory, MonitorConfig, PerformanceMonitor, ResourceOptimizer, TelemetrySnapshot,
        UserActivity,
    },
    CirrusConfig, ConfigLoader,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::debug;

/// Inspect cirrus configuration and preview resource tuning
#[derive(Parser, Debug)]
#[command(name = "cirrus-tune")]
#[command(version)]
#[command(about = "Inspect cirrus configuration and preview resource tuning")]
struct Cli {
    /// Configuration file (TOML); CIRRUS__* environment variables override it
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Print the effective configuration
    Config {
        #[arg(long, value_enum, default_value_t = Format::Toml)]
        format: Format,
    },

    /// Derive a strategy from the given telemetry and print it as JSON
    Simulate {
        /// Process memory in megabytes
        #[arg(long, default_value_t = 100)]
        memory_mb: u64,

        /// Mean call latency in milliseconds
        #[arg(long, default_value_t = 0.0)]
        latency_ms: f64,

        /// Fraction of failed calls (0.0 to 1.0)
        #[arg(long, default_value_t = 0.0)]
        error_rate: f64,

        #[arg(long, value_enum, default_value_t = Activity::Normal)]
        activity: Activity,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Low,
    Normal,
    High,
}

impl From<Activity> for UserActivity {
    fn from(activity: Activity) -> Self {
        match activity {
            Activity::Low => UserActivity::Low,
            Activity::Normal => UserActivity::Normal,
            Activity::High => UserActivity::High,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load().context("failed to load configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    cirrus::common::logging::init_tracing(level).context("failed to initialise logging")?;
    debug!(config = ?cli.config, "Configuration loaded");

    match cli.command {
        Commands::Config { format } => print_config(&config, format),
        Commands::Simulate {
            memory_mb,
            latency_ms,
            error_rate,
            activity,
        } => simulate(&config, memory_mb, latency_ms, error_rate, activity),
    }
}

fn print_config(config: &CirrusConfig, format: Format) -> Result<()> {
    let rendered = match format {
        Format::Toml => config.to_toml()?,
        Format::Json => serde_json::to_string_pretty(config)?,
    };
    println!("{}", rendered);
    Ok(())
}

fn simulate(
    config: &CirrusConfig,
    memory_mb: u64,
    latency_ms: f64,
    error_rate: f64,
    activity: Activity,
) -> Result<()> {
    if !(0.0..=1.0).contains(&error_rate) {
        anyhow::bail!("--error-rate must be between 0 and 1, got {}", error_rate);
    }

    let memory = Arc::new(FixedMemory::from_mb(memory_mb));
    let monitor = Arc::new(PerformanceMonitor::with_memory_source(MonitorConfig::default(), memory));
    let optimizer = ResourceOptimizer::new(
        config.optimizer.clone(),
        config.baseline_strategy(),
        monitor,
    );

    let telemetry = TelemetrySnapshot {
        timestamp: Utc::now(),
        memory_bytes: memory_mb * 1024 * 1024,
        mean_latency_ms: latency_ms,
        p95_latency_ms: latency_ms,
        error_rate,
        user_activity: activity.into(),
        ..Default::default()
    };

    let (strategy, rules) = optimizer.optimize_for(&telemetry);
    let report = json!({
        "telemetry": telemetry,
        "baseline": optimizer.baseline(),
        "strategy": strategy,
        "changed_fields": optimizer.baseline().diff(&strategy),
        "rules_applied": rules,
        "cleanup_triggered": telemetry.memory_bytes > config.optimizer.gc_threshold_bytes(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
