// Runner configuration
//
// Everything is read from the environment (optionally seeded from a `.env`
// file). Missing variables fall back to the defaults below; a variable that is
// present but unparsable is an error rather than a silent fallback.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arbiter_pool::WorkerPoolConfig;

const DEFAULT_MIN_WORKERS: usize = 2;
const DEFAULT_MAX_WORKERS: usize = 10;
const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RESOURCE_THRESHOLD: f64 = 0.85;
const DEFAULT_SCALING_FACTOR: f64 = 2.0;
const DEFAULT_TASKS_PER_SEC: f64 = 5.0;
const DEFAULT_METRICS_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub pool: WorkerPoolConfig,
    /// Synthetic tasks submitted per second; 0 disables the load generator
    pub tasks_per_sec: f64,
    /// Probability that a simulated task body fails
    pub failure_rate: f64,
    pub metrics_interval: Duration,
}

impl RunnerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `POOL_MIN_WORKERS` (default: 2)
    /// - `POOL_MAX_WORKERS` (default: 10)
    /// - `POOL_TASK_TIMEOUT_MS` (default: 30000)
    /// - `POOL_HEARTBEAT_INTERVAL_MS` (default: 1000)
    /// - `POOL_MEMORY_THRESHOLD` (default: 0.85)
    /// - `POOL_CPU_THRESHOLD` (default: 0.85)
    /// - `POOL_SCALING_FACTOR` (default: 2.0)
    /// - `LOADGEN_TASKS_PER_SEC` (default: 5.0, 0 disables)
    /// - `LOADGEN_FAILURE_RATE` (default: 0.0)
    /// - `METRICS_INTERVAL_MS` (default: 10000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pool = WorkerPoolConfig::new(
            parse_or(&lookup, "POOL_MIN_WORKERS", DEFAULT_MIN_WORKERS)?,
            parse_or(&lookup, "POOL_MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
            millis_or(&lookup, "POOL_TASK_TIMEOUT_MS", DEFAULT_TASK_TIMEOUT_MS)?,
            millis_or(
                &lookup,
                "POOL_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )?,
            parse_or(&lookup, "POOL_MEMORY_THRESHOLD", DEFAULT_RESOURCE_THRESHOLD)?,
            parse_or(&lookup, "POOL_CPU_THRESHOLD", DEFAULT_RESOURCE_THRESHOLD)?,
            parse_or(&lookup, "POOL_SCALING_FACTOR", DEFAULT_SCALING_FACTOR)?,
        );
        pool.validate().context("Invalid pool configuration")?;

        let tasks_per_sec = parse_or(&lookup, "LOADGEN_TASKS_PER_SEC", DEFAULT_TASKS_PER_SEC)?;
        if !(tasks_per_sec.is_finite() && tasks_per_sec >= 0.0) {
            bail!("LOADGEN_TASKS_PER_SEC must be a non-negative number, got {tasks_per_sec}");
        }

        let failure_rate = parse_or(&lookup, "LOADGEN_FAILURE_RATE", 0.0)?;
        if !(0.0..=1.0).contains(&failure_rate) {
            bail!("LOADGEN_FAILURE_RATE must be within [0, 1], got {failure_rate}");
        }

        let metrics_interval =
            millis_or(&lookup, "METRICS_INTERVAL_MS", DEFAULT_METRICS_INTERVAL_MS)?;
        if metrics_interval.is_zero() {
            bail!("METRICS_INTERVAL_MS must be non-zero");
        }

        Ok(Self {
            pool,
            tasks_per_sec,
            failure_rate,
            metrics_interval,
        })
    }

    pub fn loadgen_enabled(&self) -> bool {
        self.tasks_per_sec > 0.0
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {key}={raw:?}")),
        None => Ok(default),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration> {
    parse_or(lookup, key, default).map(Duration::from_millis)
}
