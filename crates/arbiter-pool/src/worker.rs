//! Worker records
//!
//! A [`Worker`] is the pool's observed state of one execution slot. Its
//! status is derived from `current_task`, so a worker is busy exactly when
//! it holds a task.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::sampler::ResourceUsage;
use crate::task::TaskId;

/// Stable worker identifier, never reused within a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Sequence number assigned by the pool
    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

impl Serialize for WorkerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// Observed state of one execution slot
#[derive(Debug, Clone)]
pub struct Worker {
    id: WorkerId,
    current_task: Option<TaskId>,
    last_heartbeat: Instant,
    idle_since: Instant,
    cpu_usage: f64,
    memory_usage: f64,
    task_count: u64,
    errors: u64,
}

impl Worker {
    pub fn new(id: WorkerId, now: Instant) -> Self {
        Self {
            id,
            current_task: None,
            last_heartbeat: now,
            idle_since: now,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            task_count: 0,
            errors: 0,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        if self.current_task.is_some() {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_task.is_none()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usage
    }

    pub fn memory_usage(&self) -> f64 {
        self.memory_usage
    }

    /// Tasks assigned since the worker was created
    pub fn task_count(&self) -> u64 {
        self.task_count
    }

    /// Failed attempts since the worker was created
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Cumulative failure ratio
    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.task_count.max(1) as f64
    }

    /// Time spent idle, zero while busy
    pub fn idle_time(&self, now: Instant) -> Duration {
        if self.is_idle() {
            now.saturating_duration_since(self.idle_since)
        } else {
            Duration::ZERO
        }
    }

    /// Whether no liveness signal arrived within `limit`
    pub fn is_unresponsive(&self, now: Instant, limit: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > limit
    }

    pub(crate) fn assign(&mut self, task_id: TaskId) {
        self.current_task = Some(task_id);
        self.task_count += 1;
    }

    pub(crate) fn release(&mut self, now: Instant) {
        self.current_task = None;
        self.idle_since = now;
        self.last_heartbeat = now;
    }

    pub(crate) fn beat(&mut self, now: Instant) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }

    pub(crate) fn record_usage(&mut self, usage: ResourceUsage) {
        self.cpu_usage = usage.cpu;
        self.memory_usage = usage.memory;
    }

    pub(crate) fn record_error(&mut self) {
        self.errors += 1;
    }
}
