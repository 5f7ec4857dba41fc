//! Read-only pool snapshots

use std::collections::BTreeMap;

use serde::Serialize;

use crate::distribution::DistributionMetrics;
use crate::task::TaskId;
use crate::worker::{Worker, WorkerId, WorkerStatus};

/// Cumulative outcome counters since the pool was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolTotals {
    /// Tasks accepted by `submit_task`
    pub submitted: u64,
    /// Attempts that succeeded
    pub completed: u64,
    /// Attempts that failed, timed out, or were abandoned
    pub failed_attempts: u64,
    /// Tasks returned to the queue for another attempt
    pub retried: u64,
    /// Tasks discarded after exhausting their retries
    pub dropped: u64,
}

/// One worker as seen in a metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub task_count: u64,
    pub errors: u64,
}

impl From<&Worker> for WorkerSnapshot {
    fn from(worker: &Worker) -> Self {
        Self {
            status: worker.status(),
            current_task: worker.current_task(),
            cpu_usage: worker.cpu_usage(),
            memory_usage: worker.memory_usage(),
            task_count: worker.task_count(),
            errors: worker.errors(),
        }
    }
}

/// Point-in-time view returned by `WorkerPool::get_metrics`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub worker_count: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub per_worker: BTreeMap<WorkerId, WorkerSnapshot>,
    pub distribution: DistributionMetrics,
    pub totals: PoolTotals,
}

/// Liveness summary returned by `WorkerPool::check_health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    pub running: bool,
    pub worker_count: usize,
    pub idle_workers: usize,
    pub unresponsive_workers: Vec<WorkerId>,
    pub queued_tasks: usize,
    pub healthy: bool,
}
