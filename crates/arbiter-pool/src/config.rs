//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::distribution::OptimizerConfig;

/// Default back-off of the dispatch loop when it has nothing to do
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Unresponsive workers are those silent for this many heartbeat intervals
pub const HEARTBEAT_MISS_LIMIT: u32 = 3;

/// Worker pool configuration
///
/// Every scaling and health threshold is required; there are no hidden
/// defaults for them.
///
/// # Example
///
/// ```
/// use arbiter_pool::WorkerPoolConfig;
/// use std::time::Duration;
///
/// let config = WorkerPoolConfig::new(
///     2,                          // min_workers
///     5,                          // max_workers
///     Duration::from_secs(30),    // task_timeout
///     Duration::from_secs(1),     // heartbeat_interval
///     0.9,                        // memory_threshold
///     0.9,                        // cpu_threshold
///     2.0,                        // scaling_factor
/// );
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Lower bound on the number of workers
    pub min_workers: usize,

    /// Upper bound on the number of workers
    pub max_workers: usize,

    /// Ceiling on any single execution attempt
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// Monitor cycle period; workers silent for three periods are replaced
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Host memory fraction above which scale-up is refused
    pub memory_threshold: f64,

    /// Host CPU fraction above which scale-up is refused
    pub cpu_threshold: f64,

    /// Queued-tasks-per-worker ratio that triggers scaling
    pub scaling_factor: f64,

    /// Dispatch loop back-off when the queue is empty or no worker is idle
    #[serde(with = "duration_millis", default = "default_dispatch_interval")]
    pub dispatch_interval: Duration,

    /// Distribution optimizer tuning
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

fn default_dispatch_interval() -> Duration {
    DEFAULT_DISPATCH_INTERVAL
}

impl WorkerPoolConfig {
    /// Create a configuration from the required thresholds
    pub fn new(
        min_workers: usize,
        max_workers: usize,
        task_timeout: Duration,
        heartbeat_interval: Duration,
        memory_threshold: f64,
        cpu_threshold: f64,
        scaling_factor: f64,
    ) -> Self {
        Self {
            min_workers,
            max_workers,
            task_timeout,
            heartbeat_interval,
            memory_threshold,
            cpu_threshold,
            scaling_factor,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            optimizer: OptimizerConfig::default(),
        }
    }

    /// Set the dispatch loop back-off
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Set the optimizer tuning
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Silence after which a worker is declared unresponsive
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * HEARTBEAT_MISS_LIMIT
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers == 0 {
            return Err(ConfigError::Invalid("min_workers must be at least 1".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(ConfigError::Invalid(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if !(self.scaling_factor.is_finite() && self.scaling_factor > 0.0) {
            return Err(ConfigError::Invalid("scaling_factor must be positive".into()));
        }
        for (name, value) in [
            ("memory_threshold", self.memory_threshold),
            ("cpu_threshold", self.cpu_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within (0, 1], got {value}"
                )));
            }
        }
        for (name, value) in [
            ("task_timeout", self.task_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("dispatch_interval", self.dispatch_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        self.optimizer.validate()
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration
    #[error("invalid worker pool configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
