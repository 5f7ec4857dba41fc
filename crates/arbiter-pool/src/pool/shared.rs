//! State shared between the pool handle, its loops, and running attempts

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::scaling::{plan_scaling, ScalingPlan};
use super::state::{InFlight, PoolState, RetryDecision};
use super::worker_pool::PoolError;
use crate::config::WorkerPoolConfig;
use crate::distribution::DistributionOptimizer;
use crate::executor::{ExecutionError, ExecutionResult, TaskContext, TaskExecutor};
use crate::sampler::{ResourceSampler, ResourceUsage};
use crate::task::{Task, TaskId};
use crate::worker::{Worker, WorkerId};

/// Result of one dispatch attempt
#[derive(Debug)]
pub(crate) enum DispatchOutcome {
    Dispatched { worker_id: WorkerId, task: Task },
    QueueEmpty,
    NoIdleWorker,
}

pub(crate) struct PoolShared {
    pub config: WorkerPoolConfig,
    pub state: Mutex<PoolState>,
    pub optimizer: Mutex<DistributionOptimizer>,
    pub executor: Arc<dyn TaskExecutor>,
    pub sampler: Arc<dyn ResourceSampler>,
    pub running: AtomicBool,
}

impl PoolShared {
    pub fn new(
        config: WorkerPoolConfig,
        executor: Arc<dyn TaskExecutor>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        let optimizer = DistributionOptimizer::new(config.optimizer.clone());
        Self {
            config,
            state: Mutex::new(PoolState::new()),
            optimizer: Mutex::new(optimizer),
            executor,
            sampler,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Worker lifecycle
    // ------------------------------------------------------------------

    pub fn create_worker(
        &self,
        state: &mut PoolState,
        now: Instant,
    ) -> Result<WorkerId, PoolError> {
        let max = self.config.max_workers;
        if state.workers.len() >= max {
            return Err(PoolError::CapacityExhausted { max });
        }

        let id = state.next_worker_id();
        self.sampler
            .attach(id)
            .map_err(|e| PoolError::WorkerCreation {
                reason: e.to_string(),
            })?;

        state.workers.insert(id, Worker::new(id, now));
        debug!(worker_id = %id, workers = state.workers.len(), "worker created");
        Ok(id)
    }

    /// Destroy a worker, handing back whatever it was running
    ///
    /// The caller decides what happens to the returned attempt; its
    /// execution is aborted here.
    pub fn remove_worker(
        &self,
        state: &mut PoolState,
        optimizer: &mut DistributionOptimizer,
        worker_id: WorkerId,
    ) -> Option<InFlight> {
        state.workers.remove(&worker_id)?;
        self.sampler.detach(worker_id);
        optimizer.forget_worker(worker_id);
        debug!(worker_id = %worker_id, workers = state.workers.len(), "worker removed");

        let flight = state.in_flight.remove(&worker_id)?;
        if let Some(abort) = &flight.abort {
            abort.abort();
        }
        Some(flight)
    }

    /// Fail an abandoned attempt and apply the retry rule
    fn abandon(
        &self,
        state: &mut PoolState,
        optimizer: &mut DistributionOptimizer,
        worker_id: WorkerId,
        flight: InFlight,
        now: Instant,
    ) -> RetryDecision {
        let elapsed = now.saturating_duration_since(flight.started_at);
        state.totals.failed_attempts += 1;
        optimizer.record_task_completion(&flight.task, worker_id, elapsed, false, now);
        state.retry_or_drop(flight.task)
    }

    /// Destroy an unresponsive worker and create its replacement
    fn replace_worker(
        &self,
        state: &mut PoolState,
        optimizer: &mut DistributionOptimizer,
        worker_id: WorkerId,
        now: Instant,
    ) {
        warn!(worker_id = %worker_id, "worker unresponsive, replacing");

        if let Some(flight) = self.remove_worker(state, optimizer, worker_id) {
            let task_id = flight.task.id;
            let decision = self.abandon(state, optimizer, worker_id, flight, now);
            info!(task_id = %task_id, ?decision, "recovered task from unresponsive worker");
        }

        match self.create_worker(state, now) {
            Ok(replacement) => {
                info!(worker_id = %worker_id, replacement = %replacement, "worker replaced");
            }
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "failed to create replacement worker");
            }
        }
    }

    /// Terminate every worker, returning in-flight tasks to the queue
    pub fn teardown(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut optimizer = self.optimizer.lock();

        let ids: Vec<WorkerId> = state.workers.keys().copied().collect();
        for id in ids {
            if let Some(flight) = self.remove_worker(&mut state, &mut optimizer, id) {
                self.abandon(&mut state, &mut optimizer, id, flight, now);
            }
        }

        optimizer.release();
        info!(queued = state.queue.len(), "workers terminated");
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Match the head of the queue with an idle worker
    ///
    /// Runs under the state lock, so the dequeue and assignment are observed
    /// as one step.
    pub fn dispatch_next(&self) -> DispatchOutcome {
        let now = Instant::now();
        let mut state = self.state.lock();

        let Some(head) = state.queue.peek() else {
            return DispatchOutcome::QueueEmpty;
        };
        let idle = state.idle_workers();
        let chosen = self.optimizer.lock().get_optimal_worker(head, &idle);

        let Some(worker_id) = chosen else {
            return DispatchOutcome::NoIdleWorker;
        };
        match state.assign_head(worker_id, now) {
            Some(flight) => DispatchOutcome::Dispatched {
                worker_id,
                task: flight.task.clone(),
            },
            None => DispatchOutcome::NoIdleWorker,
        }
    }

    /// Run an assigned task on its own tokio task
    pub fn spawn_attempt(self: &Arc<Self>, worker_id: WorkerId, task: Task) {
        let task_id = task.id;
        let span = info_span!(
            "task_attempt",
            task_id = %task_id,
            worker_id = %worker_id,
            priority = %task.priority,
            attempt = task.retries,
        );

        let handle = tokio::spawn(Arc::clone(self).run_task(worker_id, task).instrument(span));

        let mut state = self.state.lock();
        if let Some(flight) = state.in_flight.get_mut(&worker_id) {
            if flight.task.id == task_id {
                flight.abort = Some(handle.abort_handle());
            }
        }
    }

    async fn run_task(self: Arc<Self>, worker_id: WorkerId, task: Task) {
        let limit = task.timeout.min(self.config.task_timeout);
        let ctx = TaskContext::new(&task, worker_id, self.heartbeat_fn(worker_id, task.id));

        debug!("executing task");
        let started = Instant::now();
        let attempt =
            AssertUnwindSafe(self.executor.execute(ctx, task.payload.clone())).catch_unwind();

        let result: ExecutionResult = match tokio::time::timeout(limit, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ExecutionError::failed(panic_message(panic.as_ref()))),
            Err(_) => Err(ExecutionError::TimedOut { limit }),
        };

        self.complete_attempt(worker_id, &task, started.elapsed(), result);
    }

    fn heartbeat_fn(
        self: &Arc<Self>,
        worker_id: WorkerId,
        task_id: TaskId,
    ) -> Arc<dyn Fn() -> bool + Send + Sync> {
        let shared: Weak<Self> = Arc::downgrade(self);
        Arc::new(move || {
            shared
                .upgrade()
                .is_some_and(|s| s.heartbeat(worker_id, task_id))
        })
    }

    /// Refresh a busy worker's heartbeat while it still owns `task_id`
    pub fn heartbeat(&self, worker_id: WorkerId, task_id: TaskId) -> bool {
        let mut state = self.state.lock();
        match state.workers.get_mut(&worker_id) {
            Some(worker) if worker.current_task() == Some(task_id) => {
                worker.beat(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Record the outcome of an attempt and free its worker
    ///
    /// Results from attempts whose worker was replaced or torn down are
    /// discarded; their task has already been requeued or dropped.
    pub fn complete_attempt(
        &self,
        worker_id: WorkerId,
        task: &Task,
        duration: Duration,
        result: ExecutionResult,
    ) {
        let now = Instant::now();
        let mut state = self.state.lock();

        let owned = state
            .in_flight
            .get(&worker_id)
            .is_some_and(|flight| flight.task.id == task.id);
        if !owned {
            debug!(
                task_id = %task.id,
                worker_id = %worker_id,
                "discarding result of abandoned attempt"
            );
            return;
        }
        let Some(flight) = state.in_flight.remove(&worker_id) else {
            return;
        };

        let success = result.is_ok();
        if let Some(worker) = state.workers.get_mut(&worker_id) {
            if !success {
                worker.record_error();
            }
            worker.release(now);
        }
        self.optimizer
            .lock()
            .record_task_completion(&flight.task, worker_id, duration, success, now);

        match result {
            Ok(_) => {
                state.totals.completed += 1;
                debug!(?duration, "task completed");
            }
            Err(e) => {
                state.totals.failed_attempts += 1;
                warn!(
                    error = %e,
                    attempt = flight.task.attempts(),
                    max_retries = flight.task.max_retries,
                    "task attempt failed"
                );
                state.retry_or_drop(flight.task);
            }
        }
    }

    // ------------------------------------------------------------------
    // Monitoring and scaling
    // ------------------------------------------------------------------

    /// One monitor pass: refresh readings, replace silent workers, retune
    /// the optimizer, then run the scaling check
    ///
    /// Samplers may hit the OS, so readings are taken before the state lock
    /// is acquired. Any answered sample counts as a liveness signal; a worker
    /// goes stale only when its sampler stops responding and it neither
    /// completes nor heartbeats its task.
    pub fn monitor_cycle(&self, now: Instant) {
        let timeout = self.config.heartbeat_timeout();
        let ids: Vec<WorkerId> = self.state.lock().workers.keys().copied().collect();
        let readings: Vec<(WorkerId, Option<ResourceUsage>)> = ids
            .into_iter()
            .map(|id| (id, self.sampler.sample(id)))
            .collect();

        {
            let mut state = self.state.lock();
            let mut optimizer = self.optimizer.lock();
            let mut unresponsive = Vec::new();

            for (id, reading) in readings {
                // removed while sampling
                let Some(worker) = state.workers.get_mut(&id) else {
                    continue;
                };
                if let Some(usage) = reading {
                    worker.record_usage(usage);
                    worker.beat(now);
                }

                if worker.is_unresponsive(now, timeout) {
                    unresponsive.push(id);
                } else {
                    optimizer.update_worker_status(worker, now);
                }
            }

            for id in unresponsive {
                self.replace_worker(&mut state, &mut optimizer, id, now);
            }
            optimizer.tune(now);
        }

        self.check_scaling(now);
    }

    /// Out-of-band scaling check used when no worker is idle
    pub fn scaling_check(&self) {
        self.check_scaling(Instant::now());
    }

    fn plan(&self, state: &PoolState) -> ScalingPlan {
        plan_scaling(
            state.queue.len(),
            state.workers.len(),
            state.idle_count(),
            &self.config,
        )
    }

    fn check_scaling(&self, now: Instant) {
        let wants_growth = matches!(self.plan(&self.state.lock()), ScalingPlan::Grow(_));
        if wants_growth {
            let system = self.sampler.system();
            if system.exceeds(self.config.cpu_threshold, self.config.memory_threshold) {
                warn!(
                    cpu = system.cpu,
                    memory = system.memory,
                    "scale-up skipped, host resources above thresholds"
                );
                return;
            }
        }

        let mut state = self.state.lock();
        let queued = state.queue.len();
        match self.plan(&state) {
            ScalingPlan::Hold => {}
            // backlog appeared after the pressure check; next cycle handles it
            ScalingPlan::Grow(_) if !wants_growth => {}
            ScalingPlan::Grow(count) => {
                let added = self.grow(&mut state, count, now);
                info!(added, queued, workers = state.workers.len(), "scaled up");
            }
            ScalingPlan::Shrink(count) => {
                let mut optimizer = self.optimizer.lock();
                let removed = self.shrink(&mut state, &mut optimizer, count);
                info!(removed, queued, workers = state.workers.len(), "scaled down");
            }
        }
    }

    /// Add up to `count` workers, stopping at the first creation failure
    pub fn grow(&self, state: &mut PoolState, count: usize, now: Instant) -> usize {
        let mut added = 0;
        for _ in 0..count {
            match self.create_worker(state, now) {
                Ok(_) => added += 1,
                Err(e) => {
                    warn!(error = %e, "worker creation failed, continuing with fewer workers");
                    break;
                }
            }
        }
        added
    }

    /// Remove up to `count` idle workers, newest first
    pub fn shrink(
        &self,
        state: &mut PoolState,
        optimizer: &mut DistributionOptimizer,
        count: usize,
    ) -> usize {
        let victims: Vec<WorkerId> = state.idle_workers().into_iter().rev().take(count).collect();
        for id in &victims {
            self.remove_worker(state, optimizer, *id);
        }
        victims.len()
    }
}

// ----------------------------------------------------------------------
// Background loops
// ----------------------------------------------------------------------

pub(crate) async fn monitor_loop(shared: Arc<PoolShared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.monitor_cycle(Instant::now());
            }
            _ = shutdown.changed() => {
                debug!("Monitor loop: shutdown requested");
                break;
            }
        }
    }

    debug!("Monitor loop exited");
}

pub(crate) async fn dispatch_loop(shared: Arc<PoolShared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match shared.dispatch_next() {
            DispatchOutcome::Dispatched { worker_id, task } => {
                shared.spawn_attempt(worker_id, task);
                tokio::task::yield_now().await;
                continue;
            }
            DispatchOutcome::QueueEmpty => {}
            DispatchOutcome::NoIdleWorker => shared.scaling_check(),
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.config.dispatch_interval) => {}
            _ = shutdown.changed() => {
                debug!("Dispatch loop: shutdown requested");
                break;
            }
        }
    }

    debug!("Dispatch loop exited");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("executor panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("executor panicked: {message}")
    } else {
        "executor panicked".to_string()
    }
}
