//! # Arbiter Pool
//!
//! An adaptive, in-process worker pool for background tasks.
//!
//! ## Features
//!
//! - **Priority queue**: highest priority first, FIFO within a priority band
//! - **Dynamic scaling**: grows and shrinks with queue depth inside `[min_workers, max_workers]`
//! - **Adaptive placement**: load, error-rate and resource signals pick the worker for each task
//! - **Self-tuning strategy**: round-robin, least-loaded, priority-based or resource-aware
//! - **Failure handling**: bounded retries, heartbeat-based replacement of silent workers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (queue, workers, dispatch loop, monitor loop, scaling)     │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │     DistributionOptimizer    │   │     ResourceSampler      │
//! │ (load scores, history,       │   │ (worker + host readings) │
//! │  strategy self-tuning)       │   └──────────────────────────┘
//! └──────────────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TaskExecutor                           │
//! │  (runs opaque payloads, timeout-bounded per attempt)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use arbiter_pool::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), PoolError> {
//! let config = WorkerPoolConfig::new(
//!     2,
//!     10,
//!     Duration::from_secs(30),
//!     Duration::from_secs(1),
//!     0.85,
//!     0.85,
//!     2.0,
//! );
//!
//! let executor = FnExecutor::new(|ctx: TaskContext, payload: serde_json::Value| async move {
//!     ctx.heartbeat()?;
//!     Ok::<_, ExecutionError>(json!({ "processed": payload }))
//! });
//!
//! let pool = WorkerPool::new(config, Arc::new(executor), Arc::new(SystemSampler::new()))?;
//! pool.start().await?;
//!
//! pool.submit_task(TaskPriority::Critical, json!({"game": 1}), Duration::from_secs(10), 3)?;
//!
//! for hint in pool.get_recommendations() {
//!     println!("{hint}");
//! }
//! pool.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod distribution;
pub mod executor;
pub mod pool;
pub mod sampler;
pub mod task;
pub mod worker;

pub use config::{ConfigError, WorkerPoolConfig};
pub use distribution::{
    DistributionMetrics, DistributionOptimizer, DistributionStrategy, OptimizerConfig,
    WorkerMetrics,
};
pub use executor::{
    ExecutionError, ExecutionResult, FnExecutor, SimulatedExecutor, TaskContext, TaskExecutor,
};
pub use pool::{PoolError, PoolHealth, PoolMetrics, PoolTotals, WorkerPool, WorkerSnapshot};
pub use sampler::{ResourceSampler, ResourceUsage, SamplerError, StaticSampler, SystemSampler};
pub use task::{Task, TaskId, TaskPriority};
pub use worker::{Worker, WorkerId, WorkerStatus};

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::WorkerPoolConfig;
    pub use crate::executor::{
        ExecutionError, ExecutionResult, FnExecutor, SimulatedExecutor, TaskContext, TaskExecutor,
    };
    pub use crate::pool::{PoolError, PoolMetrics, WorkerPool};
    pub use crate::sampler::{ResourceSampler, ResourceUsage, StaticSampler, SystemSampler};
    pub use crate::task::{Task, TaskId, TaskPriority};
}
