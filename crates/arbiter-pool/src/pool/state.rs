//! Mutable pool state guarded by a single lock

use std::collections::BTreeMap;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::metrics::PoolTotals;
use super::queue::TaskQueue;
use crate::task::Task;
use crate::worker::{Worker, WorkerId};

/// A task currently assigned to a worker
#[derive(Debug)]
pub(crate) struct InFlight {
    pub task: Task,
    pub started_at: Instant,
    pub abort: Option<AbortHandle>,
}

/// What happened to a task after a failed or abandoned attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    Requeued,
    Dropped,
}

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    pub workers: BTreeMap<WorkerId, Worker>,
    pub queue: TaskQueue,
    pub in_flight: BTreeMap<WorkerId, InFlight>,
    pub totals: PoolTotals,
    next_worker: u64,
}

impl PoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh worker id; ids are never handed out twice
    pub fn next_worker_id(&mut self) -> WorkerId {
        let id = WorkerId::new(self.next_worker);
        self.next_worker += 1;
        id
    }

    /// Idle workers in creation order
    pub fn idle_workers(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.is_idle())
            .map(Worker::id)
            .collect()
    }

    pub fn idle_count(&self) -> usize {
        self.workers.values().filter(|w| w.is_idle()).count()
    }

    /// Pop the head of the queue and bind it to `worker_id` in one step
    pub fn assign_head(&mut self, worker_id: WorkerId, now: Instant) -> Option<&mut InFlight> {
        let worker = self.workers.get_mut(&worker_id).filter(|w| w.is_idle())?;
        let task = self.queue.pop()?;
        worker.assign(task.id);

        self.in_flight.insert(
            worker_id,
            InFlight {
                task,
                started_at: now,
                abort: None,
            },
        );
        self.in_flight.get_mut(&worker_id)
    }

    /// Requeue a task with one more retry consumed, or drop it when the
    /// budget is exhausted
    pub fn retry_or_drop(&mut self, mut task: Task) -> RetryDecision {
        if task.can_retry() {
            task.retries += 1;
            self.totals.retried += 1;
            self.queue.push(task);
            RetryDecision::Requeued
        } else {
            self.totals.dropped += 1;
            tracing::error!(
                task_id = %task.id,
                priority = %task.priority,
                attempts = task.attempts(),
                "task dropped after exhausting retries"
            );
            RetryDecision::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskPriority;
    use serde_json::json;

    #[test]
    fn test_worker_ids_are_not_reused() {
        let mut state = PoolState::new();
        let a = state.next_worker_id();
        let b = state.next_worker_id();
        state.workers.insert(a, Worker::new(a, Instant::now()));
        state.workers.remove(&a);
        let c = state.next_worker_id();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_assign_head_is_atomic() {
        let now = Instant::now();
        let mut state = PoolState::new();
        let id = state.next_worker_id();
        state.workers.insert(id, Worker::new(id, now));
        state.queue.push(Task::new(TaskPriority::High, json!(null)));
        state.queue.push(Task::new(TaskPriority::Low, json!(null)));

        let task_id = state.assign_head(id, now).map(|f| f.task.id).unwrap();
        assert_eq!(state.workers[&id].current_task(), Some(task_id));
        assert_eq!(state.queue.len(), 1);
        assert!(state.idle_workers().is_empty());

        // A busy worker cannot take a second task
        assert!(state.assign_head(id, now).is_none());
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn test_retry_or_drop() {
        let mut state = PoolState::new();
        let mut task = Task::new(TaskPriority::Low, json!(null)).with_max_retries(1);

        assert_eq!(state.retry_or_drop(task.clone()), RetryDecision::Requeued);
        assert_eq!(state.queue.peek().map(|t| t.retries), Some(1));

        task.retries = 1;
        assert_eq!(state.retry_or_drop(task), RetryDecision::Dropped);
        assert_eq!(state.totals.retried, 1);
        assert_eq!(state.totals.dropped, 1);
    }
}
