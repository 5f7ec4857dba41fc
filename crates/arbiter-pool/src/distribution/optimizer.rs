//! Distribution optimizer
//!
//! Keeps a load score and a [`WorkerMetrics`] record per worker, picks the
//! worker for each task under the active [`DistributionStrategy`], and
//! retunes that strategy once per monitor cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::history::{TaskHistory, TaskOutcome};
use super::strategy::{DistributionStrategy, LoadView};
use crate::config::{duration_millis, ConfigError};
use crate::task::{Task, TaskPriority};
use crate::worker::{Worker, WorkerId};

/// Damping applied to an overloaded worker's score during rebalancing
pub const REBALANCE_DAMPING: f64 = 0.9;

const CPU_WEIGHT: f64 = 0.3;
const MEMORY_WEIGHT: f64 = 0.3;
const ERROR_WEIGHT: f64 = 0.2;
const THROUGHPUT_WEIGHT: f64 = 0.2;

/// Optimizer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Load score above which a worker counts as overloaded
    pub load_threshold: f64,

    /// Windowed error rate above which a worker is reported
    pub error_threshold: f64,

    /// Load score gap (and variance) that counts as an imbalance
    pub rebalance_threshold: f64,

    /// Number of outcomes kept in the history
    pub history_capacity: usize,

    /// Lookback used for throughput, error rate and success rates
    #[serde(with = "duration_millis")]
    pub history_window: Duration,

    /// Minimum critical-task success rate before switching to priority placement
    pub critical_success_target: f64,

    /// Throughput (tasks/s) at which a worker earns no throughput penalty
    pub throughput_ceiling: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            load_threshold: 0.8,
            error_threshold: 0.1,
            rebalance_threshold: 0.2,
            history_capacity: 1000,
            history_window: Duration::from_secs(300),
            critical_success_target: 0.95,
            throughput_ceiling: 10.0,
        }
    }
}

impl OptimizerConfig {
    pub fn with_load_threshold(mut self, threshold: f64) -> Self {
        self.load_threshold = threshold;
        self
    }

    pub fn with_error_threshold(mut self, threshold: f64) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_rebalance_threshold(mut self, threshold: f64) -> Self {
        self.rebalance_threshold = threshold;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_history_window(mut self, window: Duration) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_critical_success_target(mut self, target: f64) -> Self {
        self.critical_success_target = target;
        self
    }

    pub fn with_throughput_ceiling(mut self, ceiling: f64) -> Self {
        self.throughput_ceiling = ceiling;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("load_threshold", self.load_threshold),
            ("error_threshold", self.error_threshold),
            ("rebalance_threshold", self.rebalance_threshold),
            ("critical_success_target", self.critical_success_target),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "optimizer {name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "optimizer history_capacity must be at least 1".into(),
            ));
        }
        if self.history_window.is_zero() {
            return Err(ConfigError::Invalid(
                "optimizer history_window must be non-zero".into(),
            ));
        }
        if !(self.throughput_ceiling.is_finite() && self.throughput_ceiling > 0.0) {
            return Err(ConfigError::Invalid(
                "optimizer throughput_ceiling must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Per-worker signals recomputed every monitor cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Completed attempts per second over the history window
    pub task_throughput: f64,
    /// Failed fraction of attempts in the window
    pub error_rate: f64,
    /// Mean attempt duration in seconds
    pub avg_task_time: f64,
    /// Seconds since the worker last became idle, zero while busy
    pub idle_time: f64,
}

/// Two workers whose load scores are too far apart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Imbalance {
    pub overloaded: WorkerId,
    pub underloaded: WorkerId,
    pub difference: f64,
}

/// Serializable view of the optimizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionMetrics {
    pub worker_loads: BTreeMap<WorkerId, f64>,
    pub current_strategy: DistributionStrategy,
    pub per_worker_metrics: BTreeMap<WorkerId, WorkerMetrics>,
    pub task_history_size: usize,
}

/// Adaptive worker selection
#[derive(Debug)]
pub struct DistributionOptimizer {
    config: OptimizerConfig,
    strategy: DistributionStrategy,
    worker_loads: BTreeMap<WorkerId, f64>,
    worker_metrics: BTreeMap<WorkerId, WorkerMetrics>,
    history: TaskHistory,
}

impl DistributionOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let history = TaskHistory::new(config.history_capacity);
        Self {
            config,
            strategy: DistributionStrategy::ResourceAware,
            worker_loads: BTreeMap::new(),
            worker_metrics: BTreeMap::new(),
            history,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Currently active strategy
    pub fn strategy(&self) -> DistributionStrategy {
        self.strategy
    }

    pub fn load_score(&self, worker_id: WorkerId) -> Option<f64> {
        self.worker_loads.get(&worker_id).copied()
    }

    pub fn worker_metrics(&self, worker_id: WorkerId) -> Option<&WorkerMetrics> {
        self.worker_metrics.get(&worker_id)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Recompute a worker's metrics and load score from its latest reading
    /// and the outcomes inside the history window
    pub fn update_worker_status(&mut self, worker: &Worker, now: Instant) {
        let window = self.config.history_window;
        let stats = self.history.worker_stats(worker.id(), now, window);

        let metrics = WorkerMetrics {
            cpu_usage: worker.cpu_usage(),
            memory_usage: worker.memory_usage(),
            task_throughput: stats.count as f64 / window.as_secs_f64(),
            error_rate: stats.error_rate().unwrap_or_else(|| worker.error_rate()),
            avg_task_time: stats.mean_duration().unwrap_or_default().as_secs_f64(),
            idle_time: worker.idle_time(now).as_secs_f64(),
        };

        let score = self.compute_load(&metrics);
        debug!(worker_id = %worker.id(), load = score, "worker load updated");

        self.worker_loads.insert(worker.id(), score);
        self.worker_metrics.insert(worker.id(), metrics);
    }

    fn compute_load(&self, metrics: &WorkerMetrics) -> f64 {
        let throughput = (metrics.task_throughput / self.config.throughput_ceiling).min(1.0);
        let score = CPU_WEIGHT * metrics.cpu_usage
            + MEMORY_WEIGHT * metrics.memory_usage
            + ERROR_WEIGHT * metrics.error_rate
            + THROUGHPUT_WEIGHT * (1.0 - throughput);
        score.clamp(0.0, 1.0)
    }

    /// Append one finished attempt to the history
    pub fn record_task_completion(
        &mut self,
        task: &Task,
        worker_id: WorkerId,
        duration: Duration,
        success: bool,
        now: Instant,
    ) {
        self.history.record(TaskOutcome {
            task_id: task.id,
            worker_id,
            priority: task.priority,
            duration,
            success,
            recorded_at: now,
        });
    }

    /// Pick a worker among `idle_workers` under the active strategy
    pub fn get_optimal_worker(&self, task: &Task, idle_workers: &[WorkerId]) -> Option<WorkerId> {
        if idle_workers.is_empty() {
            return None;
        }
        let view = LoadView::new(&self.worker_loads, &self.worker_metrics);
        let placement = self.strategy.placement();
        let chosen = placement.select(task, idle_workers, &view);
        debug!(
            strategy = placement.name(),
            task_id = %task.id,
            worker_id = ?chosen,
            candidates = idle_workers.len(),
            "placement decided"
        );
        chosen
    }

    /// Worker pairs whose load gap exceeds the rebalance threshold, widest first
    pub fn detect_imbalances(&self) -> Vec<Imbalance> {
        let loads: Vec<(WorkerId, f64)> =
            self.worker_loads.iter().map(|(id, load)| (*id, *load)).collect();

        let mut imbalances = Vec::new();
        for (i, (a, load_a)) in loads.iter().enumerate() {
            for (b, load_b) in &loads[i + 1..] {
                let difference = (load_a - load_b).abs();
                if difference > self.config.rebalance_threshold {
                    let (overloaded, underloaded) =
                        if load_a >= load_b { (*a, *b) } else { (*b, *a) };
                    imbalances.push(Imbalance {
                        overloaded,
                        underloaded,
                        difference,
                    });
                }
            }
        }

        imbalances.sort_by(|x, y| y.difference.total_cmp(&x.difference));
        imbalances
    }

    /// Damp the score of each overloaded worker once; returns how many were damped
    pub fn rebalance(&mut self) -> usize {
        let imbalances = self.detect_imbalances();
        let mut damped = BTreeSet::new();

        for imbalance in &imbalances {
            if !damped.insert(imbalance.overloaded) {
                continue;
            }
            if let Some(load) = self.worker_loads.get_mut(&imbalance.overloaded) {
                *load *= REBALANCE_DAMPING;
                debug!(
                    worker_id = %imbalance.overloaded,
                    peer = %imbalance.underloaded,
                    difference = imbalance.difference,
                    "damped overloaded worker"
                );
            }
        }

        damped.len()
    }

    /// Success ratio of critical tasks inside the history window
    pub fn critical_success_rate(&self, now: Instant) -> Option<f64> {
        self.history
            .success_rate(TaskPriority::Critical, now, self.config.history_window)
    }

    /// Population variance of the current load scores
    pub fn load_variance(&self) -> f64 {
        let n = self.worker_loads.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.worker_loads.values().sum::<f64>() / n as f64;
        self.worker_loads
            .values()
            .map(|load| (load - mean).powi(2))
            .sum::<f64>()
            / n as f64
    }

    /// Re-evaluate the active strategy
    ///
    /// Critical-task reliability is checked first, then overload, then load
    /// spread. Without any critical outcomes in the window the critical
    /// success rate is treated as healthy.
    pub fn select_strategy(&mut self, now: Instant) -> DistributionStrategy {
        let critical_rate = self.critical_success_rate(now);

        let next = if critical_rate.is_some_and(|r| r < self.config.critical_success_target) {
            DistributionStrategy::PriorityBased
        } else if self
            .worker_loads
            .values()
            .any(|load| *load > self.config.load_threshold)
        {
            DistributionStrategy::ResourceAware
        } else if self.load_variance() > self.config.rebalance_threshold {
            DistributionStrategy::LeastLoaded
        } else {
            DistributionStrategy::RoundRobin
        };

        if next != self.strategy {
            info!(
                from = %self.strategy,
                to = %next,
                critical_success_rate = ?critical_rate,
                "distribution strategy changed"
            );
            self.strategy = next;
        }
        next
    }

    /// Per-cycle retune: strategy selection on fresh scores, then rebalancing
    pub fn tune(&mut self, now: Instant) {
        self.select_strategy(now);
        self.rebalance();
    }

    /// Drop all state for a destroyed worker
    pub fn forget_worker(&mut self, worker_id: WorkerId) {
        self.worker_loads.remove(&worker_id);
        self.worker_metrics.remove(&worker_id);
    }

    /// Release everything held for the pool's workers
    pub fn release(&mut self) {
        self.worker_loads.clear();
        self.worker_metrics.clear();
        self.history = TaskHistory::new(self.config.history_capacity);
        self.strategy = DistributionStrategy::ResourceAware;
    }

    pub fn snapshot(&self) -> DistributionMetrics {
        DistributionMetrics {
            worker_loads: self.worker_loads.clone(),
            current_strategy: self.strategy,
            per_worker_metrics: self.worker_metrics.clone(),
            task_history_size: self.history.len(),
        }
    }

    /// Operational hints derived from the current scores
    pub fn recommendations(&self) -> Vec<String> {
        let mut hints = Vec::new();

        let overloaded: Vec<String> = self
            .worker_loads
            .iter()
            .filter(|(_, load)| **load > self.config.load_threshold)
            .map(|(id, _)| id.to_string())
            .collect();
        if !overloaded.is_empty() {
            hints.push(format!(
                "Workers [{}] are overloaded - consider scaling or rebalancing",
                overloaded.join(", ")
            ));
        }

        let failing: Vec<String> = self
            .worker_metrics
            .iter()
            .filter(|(_, m)| m.error_rate > self.config.error_threshold)
            .map(|(id, _)| id.to_string())
            .collect();
        if !failing.is_empty() {
            hints.push(format!(
                "Workers [{}] have high error rates - investigate issues",
                failing.join(", ")
            ));
        }

        if self.strategy == DistributionStrategy::ResourceAware {
            hints.push("Resource-aware distribution is active - monitor resource usage".into());
        }

        hints
    }

    #[cfg(test)]
    pub(crate) fn set_load(&mut self, worker_id: WorkerId, load: f64) {
        self.worker_loads.insert(worker_id, load);
    }
}
