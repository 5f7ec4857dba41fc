// Synthetic load generator
//
// Submits tasks of random priority at a fixed rate until shutdown is
// signalled or the pool stops accepting work.

use std::sync::Arc;
use std::time::Duration;

use arbiter_pool::{PoolError, TaskPriority, WorkerPool};
use rand::seq::SliceRandom;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;

/// Relative submission weights, lowest priority first
const PRIORITY_MIX: [(TaskPriority, u32); 4] = [
    (TaskPriority::Low, 4),
    (TaskPriority::Medium, 3),
    (TaskPriority::High, 2),
    (TaskPriority::Critical, 1),
];

pub struct LoadGenerator {
    pool: Arc<WorkerPool>,
    period: Duration,
}

impl LoadGenerator {
    pub fn new(pool: Arc<WorkerPool>, tasks_per_sec: f64) -> Self {
        Self {
            pool,
            period: Duration::from_secs_f64(1.0 / tasks_per_sec.max(f64::EPSILON)),
        }
    }

    /// Run until shutdown; returns the number of tasks submitted
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> u64 {
        info!(period_ms = self.period.as_millis() as u64, "Load generator started");

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut submitted = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if *shutdown_rx.borrow() {
                break;
            }

            let priority = random_priority();
            let payload = json!({ "kind": "synthetic", "seq": submitted });
            let timeout = self.pool.config().task_timeout;

            match self.pool.submit_task(priority, payload, timeout, MAX_RETRIES) {
                Ok(task_id) => {
                    submitted += 1;
                    debug!(task_id = %task_id, priority = ?priority, "Submitted synthetic task");
                }
                Err(PoolError::NotRunning) => {
                    warn!("Pool stopped accepting tasks, stopping load generator");
                    break;
                }
                Err(e) => warn!(error = %e, "Failed to submit synthetic task"),
            }
        }

        info!(submitted, "Load generator stopped");
        submitted
    }
}

fn random_priority() -> TaskPriority {
    PRIORITY_MIX
        .choose_weighted(&mut rand::thread_rng(), |(_, weight)| *weight)
        .map(|(priority, _)| *priority)
        .unwrap_or(TaskPriority::Medium)
}
