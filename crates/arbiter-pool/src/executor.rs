//! Task execution
//!
//! Task bodies are opaque to the pool. A [`TaskExecutor`] receives the
//! payload plus a [`TaskContext`] describing the attempt, and reports success
//! or failure back to the pool.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::task::{Task, TaskId, TaskPriority};
use crate::worker::WorkerId;

/// Execution errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// The task body reported a failure
    #[error("task failed: {0}")]
    Failed(String),

    /// The attempt exceeded its timeout
    #[error("task timed out after {limit:?}")]
    TimedOut { limit: Duration },

    /// The attempt no longer belongs to its worker
    #[error("task attempt was cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Outcome of one execution attempt
pub type ExecutionResult = Result<serde_json::Value, ExecutionError>;

type HeartbeatFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Context handed to executors for a single attempt
///
/// A worker whose resource sampler stops answering is kept alive only by
/// completions and [`TaskContext::heartbeat`]; long-running bodies should call
/// it more often than the pool's heartbeat interval, or the worker is declared
/// unresponsive after three silent intervals and its task retried elsewhere.
#[derive(Clone)]
pub struct TaskContext {
    /// Task being executed
    pub task_id: TaskId,

    /// Worker running the attempt
    pub worker_id: WorkerId,

    /// Task priority
    pub priority: TaskPriority,

    /// Retries consumed before this attempt (0 for the first attempt)
    pub attempt: u32,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    heartbeat: HeartbeatFn,
}

impl TaskContext {
    pub(crate) fn new(task: &Task, worker_id: WorkerId, heartbeat: HeartbeatFn) -> Self {
        Self {
            task_id: task.id,
            worker_id,
            priority: task.priority,
            attempt: task.retries,
            created_at: task.created_at,
            heartbeat,
        }
    }

    /// Context that is not attached to a pool; heartbeats always succeed
    pub fn detached(task: &Task, worker_id: WorkerId) -> Self {
        Self::new(task, worker_id, Arc::new(|| true))
    }

    /// Signal liveness to the pool
    ///
    /// Fails with [`ExecutionError::Cancelled`] once the attempt has been
    /// abandoned (worker replaced or pool stopped); the body should stop.
    pub fn heartbeat(&self) -> Result<(), ExecutionError> {
        if (self.heartbeat)() {
            Ok(())
        } else {
            Err(ExecutionError::Cancelled)
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("worker_id", &self.worker_id)
            .field("priority", &self.priority)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Runs task bodies
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: TaskContext, payload: serde_json::Value) -> ExecutionResult;
}

/// Executor that pretends to work for a fixed duration, then succeeds
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    work: Duration,
}

impl SimulatedExecutor {
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, ctx: TaskContext, _payload: serde_json::Value) -> ExecutionResult {
        tokio::time::sleep(self.work).await;
        Ok(json!({
            "status": "success",
            "data": format!("Processed task {}", ctx.task_id),
        }))
    }
}

/// Executor backed by an async closure
///
/// # Example
///
/// ```
/// use arbiter_pool::{ExecutionError, FnExecutor};
/// use serde_json::json;
///
/// let executor = FnExecutor::new(|_ctx, payload: serde_json::Value| async move {
///     match payload.get("score") {
///         Some(score) => Ok(json!({ "recorded": score })),
///         None => Err(ExecutionError::failed("missing score")),
///     }
/// });
/// # let _ = executor;
/// ```
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(TaskContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext, payload: serde_json::Value) -> ExecutionResult {
        (self.f)(ctx, payload).await
    }
}
