//! Worker pool handle

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::metrics::{PoolHealth, PoolMetrics, WorkerSnapshot};
use super::shared::{dispatch_loop, monitor_loop, PoolShared};
use crate::config::{ConfigError, WorkerPoolConfig};
use crate::executor::TaskExecutor;
use crate::sampler::ResourceSampler;
use crate::task::{Task, TaskId, TaskPriority};

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    /// The pool is not started, or has been stopped
    #[error("worker pool is not running")]
    NotRunning,

    /// Configuration rejected at construction
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// A worker could not be created
    #[error("failed to create worker: {reason}")]
    WorkerCreation { reason: String },

    /// The pool already holds `max_workers` workers
    #[error("worker pool is at capacity ({max} workers)")]
    CapacityExhausted { max: usize },

    /// A background loop panicked
    #[error("{0} loop panicked")]
    LoopPanicked(String),
}

impl From<ConfigError> for PoolError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(message) => Self::InvalidConfig(message),
        }
    }
}

struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    monitor: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

/// Adaptive pool of task workers
///
/// Producers submit prioritized tasks; a dispatch loop hands the head of
/// the queue to the idle worker picked by the distribution optimizer, and
/// a monitor loop keeps worker readings fresh, replaces silent workers,
/// and scales the pool between `min_workers` and `max_workers`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use arbiter_pool::{
///     SimulatedExecutor, StaticSampler, TaskPriority, WorkerPool, WorkerPoolConfig,
/// };
/// use serde_json::json;
///
/// # async fn example() -> Result<(), arbiter_pool::PoolError> {
/// let config = WorkerPoolConfig::new(
///     2,
///     8,
///     Duration::from_secs(30),
///     Duration::from_secs(1),
///     0.9,
///     0.9,
///     2.0,
/// );
/// let pool = WorkerPool::new(
///     config,
///     Arc::new(SimulatedExecutor::default()),
///     Arc::new(StaticSampler::default()),
/// )?;
///
/// pool.start().await?;
/// let task_id = pool.submit_task(
///     TaskPriority::High,
///     json!({"match_id": 7}),
///     Duration::from_secs(5),
///     3,
/// )?;
/// println!("submitted {task_id}");
///
/// pool.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    lifecycle: tokio::sync::Mutex<Option<Lifecycle>>,
}

impl WorkerPool {
    /// Create a stopped pool
    pub fn new(
        config: WorkerPoolConfig,
        executor: Arc<dyn TaskExecutor>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(PoolShared::new(config, executor, sampler)),
            lifecycle: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }

    /// Create `min_workers` workers and launch the monitor and dispatch loops
    ///
    /// Calling `start` on a running pool does nothing. If a worker cannot be
    /// created, the partially built pool is torn down and the error returned.
    #[instrument(skip(self), fields(min_workers = self.shared.config.min_workers))]
    pub async fn start(&self) -> Result<(), PoolError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("worker pool already running");
            return Ok(());
        }

        info!(
            min_workers = self.shared.config.min_workers,
            max_workers = self.shared.config.max_workers,
            "Starting worker pool"
        );

        let created = {
            let now = Instant::now();
            let mut state = self.shared.state.lock();
            (0..self.shared.config.min_workers)
                .try_for_each(|_| self.shared.create_worker(&mut state, now).map(|_| ()))
        };
        if let Err(e) = created {
            error!(error = %e, "worker pool failed to start");
            self.shared.teardown();
            return Err(e);
        }

        self.shared.set_running(true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = tokio::spawn(monitor_loop(Arc::clone(&self.shared), shutdown_rx.clone()));
        let dispatch = tokio::spawn(dispatch_loop(Arc::clone(&self.shared), shutdown_rx));

        *lifecycle = Some(Lifecycle {
            shutdown_tx,
            monitor,
            dispatch,
        });

        info!(workers = self.worker_count(), "Worker pool started");
        Ok(())
    }

    /// Stop the loops, then terminate every worker
    ///
    /// In-flight tasks go back to the queue with one more retry consumed, or
    /// are dropped when their budget is spent. Calling `stop` on a stopped
    /// pool does nothing.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), PoolError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(Lifecycle {
            shutdown_tx,
            monitor,
            dispatch,
        }) = lifecycle.take()
        else {
            debug!("worker pool already stopped");
            return Ok(());
        };

        info!("Stopping worker pool");
        self.shared.set_running(false);
        let _ = shutdown_tx.send(true);

        let mut result = Ok(());
        for (name, handle) in [("monitor", monitor), ("dispatch", dispatch)] {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(loop_name = name, "background loop panicked");
                    result = Err(PoolError::LoopPanicked(name.to_string()));
                }
            }
        }

        self.shared.teardown();
        info!("Worker pool stopped");
        result
    }

    /// Queue a task; fails when the pool is not running
    pub fn submit_task(
        &self,
        priority: TaskPriority,
        payload: serde_json::Value,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<TaskId, PoolError> {
        let task = Task::new(priority, payload)
            .with_timeout(timeout)
            .with_max_retries(max_retries);
        self.submit(task)
    }

    /// Queue a prepared task; fails when the pool is not running
    pub fn submit(&self, task: Task) -> Result<TaskId, PoolError> {
        if !self.shared.is_running() {
            return Err(PoolError::NotRunning);
        }

        let task_id = task.id;
        let priority = task.priority;
        let mut state = self.shared.state.lock();
        state.totals.submitted += 1;
        state.queue.push(task);

        debug!(task_id = %task_id, %priority, queued = state.queue.len(), "task submitted");
        Ok(task_id)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers.len()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Side-effect free snapshot of workers, queue, and optimizer state
    pub fn get_metrics(&self) -> PoolMetrics {
        let state = self.shared.state.lock();
        let distribution = self.shared.optimizer.lock().snapshot();

        PoolMetrics {
            worker_count: state.workers.len(),
            idle_workers: state.idle_count(),
            queued_tasks: state.queue.len(),
            per_worker: state
                .workers
                .iter()
                .map(|(id, worker)| (*id, WorkerSnapshot::from(worker)))
                .collect(),
            distribution,
            totals: state.totals,
        }
    }

    /// Advisory hints for operators; never acted upon
    pub fn get_recommendations(&self) -> Vec<String> {
        let config = &self.shared.config;
        let state = self.shared.state.lock();
        let mut hints = self.shared.optimizer.lock().recommendations();

        let queued = state.queue.len();
        let workers = state.workers.len();
        if queued as f64 > workers as f64 * config.scaling_factor {
            hints.push(format!(
                "High task queue size ({queued}) - consider increasing max_workers"
            ));
        }
        if workers >= config.max_workers && queued > 0 {
            hints.push(format!(
                "Pool is pinned at max_workers ({}) with {queued} queued tasks",
                config.max_workers
            ));
        }

        for (id, worker) in &state.workers {
            let error_rate = worker.error_rate();
            if error_rate > 0.1 {
                hints.push(format!(
                    "Worker {id} has high error rate ({:.1}%) - investigate issues",
                    error_rate * 100.0
                ));
            }
        }
        drop(state);

        let system = self.shared.sampler.system();
        if system.memory > config.memory_threshold {
            hints.push(format!(
                "Host memory usage ({:.0}%) is above the {:.0}% threshold - scale-up is paused",
                system.memory * 100.0,
                config.memory_threshold * 100.0
            ));
        }
        if system.cpu > config.cpu_threshold {
            hints.push(format!(
                "Host CPU usage ({:.0}%) is above the {:.0}% threshold - scale-up is paused",
                system.cpu * 100.0,
                config.cpu_threshold * 100.0
            ));
        }

        hints
    }

    /// Resize the pool by `delta` workers, clamped to the configured bounds
    ///
    /// Shrinking only removes idle workers. Returns the resulting worker count.
    #[instrument(skip(self))]
    pub fn scale_workers(&self, delta: i64) -> Result<usize, PoolError> {
        if !self.shared.is_running() {
            return Err(PoolError::NotRunning);
        }

        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        let current = state.workers.len();
        let target = (current as i64)
            .saturating_add(delta)
            .clamp(config.min_workers as i64, config.max_workers as i64) as usize;

        if target > current {
            self.shared.grow(&mut state, target - current, Instant::now());
        } else if target < current {
            let mut optimizer = self.shared.optimizer.lock();
            self.shared.shrink(&mut state, &mut optimizer, current - target);
        }

        let workers = state.workers.len();
        info!(delta, from = current, to = workers, "workers scaled manually");
        Ok(workers)
    }

    /// Liveness summary; healthy means running, within bounds, and no
    /// unresponsive worker
    pub fn check_health(&self) -> PoolHealth {
        let now = Instant::now();
        let config = &self.shared.config;
        let timeout = config.heartbeat_timeout();
        let running = self.shared.is_running();
        let state = self.shared.state.lock();

        let unresponsive_workers: Vec<_> = state
            .workers
            .values()
            .filter(|w| w.is_unresponsive(now, timeout))
            .map(|w| w.id())
            .collect();
        let worker_count = state.workers.len();
        let within_bounds = (config.min_workers..=config.max_workers).contains(&worker_count);

        PoolHealth {
            running,
            worker_count,
            idle_workers: state.idle_count(),
            healthy: running && within_bounds && unresponsive_workers.is_empty(),
            unresponsive_workers,
            queued_tasks: state.queue.len(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.get_mut().take() {
            let _ = lifecycle.shutdown_tx.send(true);
            lifecycle.monitor.abort();
            lifecycle.dispatch.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionError, SimulatedExecutor};
    use crate::pool::shared::DispatchOutcome;
    use crate::sampler::{ResourceUsage, StaticSampler};
    use crate::worker::WorkerId;
    use serde_json::json;

    fn config(min: usize, max: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new(
            min,
            max,
            Duration::from_secs(30),
            Duration::from_secs(1),
            0.9,
            0.9,
            2.0,
        )
    }

    fn pool_with(config: WorkerPoolConfig, sampler: Arc<StaticSampler>) -> WorkerPool {
        WorkerPool::new(config, Arc::new(SimulatedExecutor::default()), sampler).unwrap()
    }

    fn add_workers(pool: &WorkerPool, count: usize) -> Vec<WorkerId> {
        let now = Instant::now();
        let mut state = pool.shared.state.lock();
        (0..count)
            .map(|_| pool.shared.create_worker(&mut state, now).unwrap())
            .collect()
    }

    fn enqueue(pool: &WorkerPool, task: Task) {
        pool.shared.state.lock().queue.push(task);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = WorkerPool::new(
            config(3, 2),
            Arc::new(SimulatedExecutor::default()),
            Arc::new(StaticSampler::default()),
        );
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_submit_requires_running_pool() {
        let pool = pool_with(config(1, 2), Arc::new(StaticSampler::default()));
        let result = pool.submit_task(TaskPriority::Low, json!(null), Duration::from_secs(1), 0);
        assert_eq!(result, Err(PoolError::NotRunning));
        assert_eq!(pool.queue_len(), 0);
        assert_eq!(pool.scale_workers(1), Err(PoolError::NotRunning));
    }

    #[test]
    fn test_dispatch_takes_critical_first() {
        let pool = pool_with(config(2, 5), Arc::new(StaticSampler::default()));
        add_workers(&pool, 2);
        let low = Task::new(TaskPriority::Low, json!("low"));
        let critical = Task::new(TaskPriority::Critical, json!("critical"));
        enqueue(&pool, low.clone());
        enqueue(&pool, critical.clone());

        let DispatchOutcome::Dispatched { task, .. } = pool.shared.dispatch_next() else {
            panic!("expected a dispatch");
        };
        assert_eq!(task.id, critical.id);

        let DispatchOutcome::Dispatched { task, .. } = pool.shared.dispatch_next() else {
            panic!("expected a dispatch");
        };
        assert_eq!(task.id, low.id);
        assert!(matches!(pool.shared.dispatch_next(), DispatchOutcome::QueueEmpty));
    }

    #[test]
    fn test_dispatch_without_idle_worker() {
        let pool = pool_with(config(1, 1), Arc::new(StaticSampler::default()));
        add_workers(&pool, 1);
        enqueue(&pool, Task::new(TaskPriority::Low, json!(1)));
        enqueue(&pool, Task::new(TaskPriority::Low, json!(2)));

        assert!(matches!(pool.shared.dispatch_next(), DispatchOutcome::Dispatched { .. }));
        assert!(matches!(pool.shared.dispatch_next(), DispatchOutcome::NoIdleWorker));
        assert_eq!(pool.queue_len(), 1);
    }

    #[test]
    fn test_stale_worker_replaced_and_task_requeued() {
        let sampler = Arc::new(StaticSampler::default());
        let pool = pool_with(config(2, 5), Arc::clone(&sampler));
        let ids = add_workers(&pool, 2);
        let task = Task::new(TaskPriority::High, json!(null));
        enqueue(&pool, task.clone());

        let DispatchOutcome::Dispatched { worker_id, .. } = pool.shared.dispatch_next() else {
            panic!("expected a dispatch");
        };
        sampler.silence(worker_id);

        let interval = pool.config().heartbeat_interval;
        let later = Instant::now() + interval.mul_f64(3.5);
        pool.shared.monitor_cycle(later);

        let metrics = pool.get_metrics();
        assert_eq!(metrics.worker_count, 2);
        assert!(!metrics.per_worker.contains_key(&worker_id));
        assert!(metrics.per_worker.keys().any(|id| !ids.contains(id)));

        let state = pool.shared.state.lock();
        let requeued = state.queue.peek().unwrap();
        assert_eq!(requeued.id, task.id);
        assert_eq!(requeued.retries, 1);
        assert_eq!(state.totals.retried, 1);
    }

    #[test]
    fn test_busy_worker_answering_samples_stays_alive() {
        let pool = pool_with(config(1, 1), Arc::new(StaticSampler::default()));
        add_workers(&pool, 1);
        let task = Task::new(TaskPriority::Low, json!(null));
        enqueue(&pool, task.clone());

        let DispatchOutcome::Dispatched { worker_id, .. } = pool.shared.dispatch_next() else {
            panic!("expected a dispatch");
        };

        let interval = pool.config().heartbeat_interval;
        let start = Instant::now();
        for step in 1..=10 {
            pool.shared.monitor_cycle(start + interval * step);
        }

        let state = pool.shared.state.lock();
        let worker = &state.workers[&worker_id];
        assert_eq!(worker.current_task(), Some(task.id));
        assert_eq!(worker.last_heartbeat(), start + interval * 10);
        assert_eq!(state.totals.failed_attempts, 0);
        assert_eq!(state.totals.retried, 0);
    }

    #[test]
    fn test_abandoned_result_is_discarded() {
        let pool = pool_with(config(1, 2), Arc::new(StaticSampler::default()));
        add_workers(&pool, 1);
        enqueue(&pool, Task::new(TaskPriority::Low, json!(null)));

        let DispatchOutcome::Dispatched { worker_id, task } = pool.shared.dispatch_next() else {
            panic!("expected a dispatch");
        };
        pool.shared.teardown();

        pool.shared
            .complete_attempt(worker_id, &task, Duration::from_millis(5), Ok(json!(null)));

        let totals = pool.get_metrics().totals;
        assert_eq!(totals.completed, 0);
        assert_eq!(totals.failed_attempts, 1);
        assert_eq!(pool.queue_len(), 1);
    }

    #[test]
    fn test_failed_attempt_retries_then_drops() {
        let pool = pool_with(config(1, 1), Arc::new(StaticSampler::default()));
        add_workers(&pool, 1);
        enqueue(&pool, Task::new(TaskPriority::Low, json!(null)).with_max_retries(1));

        for _ in 0..2 {
            let DispatchOutcome::Dispatched { worker_id, task } = pool.shared.dispatch_next()
            else {
                panic!("expected a dispatch");
            };
            pool.shared.complete_attempt(
                worker_id,
                &task,
                Duration::ZERO,
                Err(ExecutionError::failed("boom")),
            );
        }

        let metrics = pool.get_metrics();
        assert_eq!(metrics.queued_tasks, 0);
        assert_eq!(metrics.totals.failed_attempts, 2);
        assert_eq!(metrics.totals.retried, 1);
        assert_eq!(metrics.totals.dropped, 1);
        let worker = metrics.per_worker.values().next().unwrap();
        assert_eq!(worker.errors, 2);
        assert_eq!(worker.task_count, 2);
    }

    #[test]
    fn test_scaling_check_grows_for_backlog() {
        let pool = pool_with(config(2, 5), Arc::new(StaticSampler::default()));
        add_workers(&pool, 2);
        for i in 0..9 {
            enqueue(&pool, Task::new(TaskPriority::Medium, json!(i)));
        }

        pool.shared.monitor_cycle(Instant::now());
        assert_eq!(pool.worker_count(), 5);
    }

    #[test]
    fn test_resource_pressure_blocks_growth() {
        let sampler = Arc::new(StaticSampler::default());
        sampler.set_system(ResourceUsage::new(0.95, 0.2));
        let pool = pool_with(config(2, 5), Arc::clone(&sampler));
        add_workers(&pool, 2);
        for i in 0..9 {
            enqueue(&pool, Task::new(TaskPriority::Medium, json!(i)));
        }

        pool.shared.monitor_cycle(Instant::now());
        assert_eq!(pool.worker_count(), 2);
        assert!(pool
            .get_recommendations()
            .iter()
            .any(|hint| hint.contains("Host CPU usage")));
    }

    #[test]
    fn test_silent_idle_worker_is_replaced() {
        let sampler = Arc::new(StaticSampler::default());
        let pool = pool_with(config(1, 3), Arc::clone(&sampler));
        let ids = add_workers(&pool, 1);
        sampler.silence(ids[0]);

        let start = Instant::now();
        pool.shared.monitor_cycle(start + Duration::from_secs(2));
        assert!(pool.get_metrics().per_worker.contains_key(&ids[0]));

        pool.shared.monitor_cycle(start + Duration::from_secs(4));
        let metrics = pool.get_metrics();
        assert_eq!(metrics.worker_count, 1);
        assert!(!metrics.per_worker.contains_key(&ids[0]));
    }

    #[tokio::test]
    async fn test_lifecycle_is_idempotent() {
        let pool = pool_with(config(2, 4), Arc::new(StaticSampler::default()));

        pool.start().await.unwrap();
        pool.start().await.unwrap();
        assert!(pool.is_running());
        assert_eq!(pool.worker_count(), 2);

        pool.stop().await.unwrap();
        pool.stop().await.unwrap();
        assert!(!pool.is_running());
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_unwinds() {
        let sampler = Arc::new(StaticSampler::default());
        sampler.reject_attach(true);
        let pool = pool_with(config(2, 4), Arc::clone(&sampler));

        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, PoolError::WorkerCreation { .. }));
        assert!(!pool.is_running());
        assert_eq!(pool.worker_count(), 0);

        sampler.reject_attach(false);
        pool.start().await.unwrap();
        assert_eq!(pool.worker_count(), 2);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_scaling_is_clamped() {
        let pool = pool_with(config(2, 4), Arc::new(StaticSampler::default()));
        pool.start().await.unwrap();

        assert_eq!(pool.scale_workers(10).unwrap(), 4);
        assert_eq!(pool.scale_workers(-10).unwrap(), 2);

        let health = pool.check_health();
        assert!(health.running);
        assert!(health.healthy);
        assert_eq!(health.worker_count, 2);

        pool.stop().await.unwrap();
        assert!(!pool.check_health().healthy);
    }
}
