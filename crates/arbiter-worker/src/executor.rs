use std::time::Duration;

use arbiter_pool::{ExecutionError, ExecutionResult, TaskContext, TaskExecutor};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

/// Simulated task body: random work time, fails with a fixed probability
#[derive(Debug, Clone)]
pub struct FlakyExecutor {
    failure_rate: f64,
    min_work: Duration,
    max_work: Duration,
}

impl FlakyExecutor {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            min_work: Duration::from_millis(50),
            max_work: Duration::from_millis(500),
        }
    }

    #[cfg(test)]
    fn with_work(mut self, work: Duration) -> Self {
        self.min_work = work;
        self.max_work = work;
        self
    }

    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let work = if self.max_work > self.min_work {
            rng.gen_range(self.min_work..=self.max_work)
        } else {
            self.min_work
        };
        (work, rng.gen_bool(self.failure_rate))
    }
}

#[async_trait]
impl TaskExecutor for FlakyExecutor {
    async fn execute(&self, ctx: TaskContext, payload: serde_json::Value) -> ExecutionResult {
        let (work, fail) = self.roll();
        tokio::time::sleep(work).await;

        if fail {
            return Err(ExecutionError::failed(format!(
                "simulated failure on attempt {}",
                ctx.attempt + 1
            )));
        }
        Ok(json!({
            "status": "success",
            "task_id": ctx.task_id.to_string(),
            "worker_id": ctx.worker_id.to_string(),
            "work_ms": work.as_millis() as u64,
            "input": payload,
        }))
    }
}
