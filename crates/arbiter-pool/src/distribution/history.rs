//! Bounded history of task outcomes

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::task::{TaskId, TaskPriority};
use crate::worker::WorkerId;

/// One finished attempt
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub priority: TaskPriority,
    pub duration: Duration,
    pub success: bool,
    pub recorded_at: Instant,
}

/// Aggregate over a worker's outcomes inside the window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub failures: usize,
    pub total_duration: Duration,
}

impl WindowStats {
    pub fn error_rate(&self) -> Option<f64> {
        (self.count > 0).then(|| self.failures as f64 / self.count as f64)
    }

    pub fn mean_duration(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total_duration / self.count as u32)
    }
}

/// Most recent outcomes, oldest first, capped at `capacity`
#[derive(Debug)]
pub struct TaskHistory {
    entries: VecDeque<TaskOutcome>,
    capacity: usize,
}

impl TaskHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, outcome: TaskOutcome) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outcomes recorded within `window` before `now`
    pub fn recent(&self, now: Instant, window: Duration) -> impl Iterator<Item = &TaskOutcome> {
        self.entries
            .iter()
            .filter(move |o| now.saturating_duration_since(o.recorded_at) < window)
    }

    pub fn worker_stats(&self, worker_id: WorkerId, now: Instant, window: Duration) -> WindowStats {
        self.recent(now, window)
            .filter(|o| o.worker_id == worker_id)
            .fold(WindowStats::default(), |mut stats, o| {
                stats.count += 1;
                stats.total_duration += o.duration;
                if !o.success {
                    stats.failures += 1;
                }
                stats
            })
    }

    /// Success ratio for one priority band; `None` without samples
    pub fn success_rate(
        &self,
        priority: TaskPriority,
        now: Instant,
        window: Duration,
    ) -> Option<f64> {
        let (total, succeeded) = self
            .recent(now, window)
            .filter(|o| o.priority == priority)
            .fold((0usize, 0usize), |(total, ok), o| {
                (total + 1, ok + usize::from(o.success))
            });

        (total > 0).then(|| succeeded as f64 / total as f64)
    }
}
