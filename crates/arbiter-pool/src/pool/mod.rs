//! Worker pool
//!
//! This module provides:
//! - [`WorkerPool`] - lifecycle, task submission, metrics, and manual scaling
//! - [`PoolMetrics`] / [`PoolHealth`] - read-only snapshots
//! - [`plan_scaling`] - the queue-depth scaling rule
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         WorkerPool                           │
//! │                                                              │
//! │  submit_task ──► ┌──────────────────────────────┐            │
//! │                  │  PoolState (one lock)        │            │
//! │                  │  queue · workers · in-flight │            │
//! │                  └──────┬──────────────▲────────┘            │
//! │                         │              │                     │
//! │  ┌───────────────┐      │              │    ┌─────────────┐  │
//! │  │ Dispatch loop ├──────┘              └────┤ Monitor loop│  │
//! │  │ head → worker │                          │ heartbeats  │  │
//! │  └──────┬────────┘                          │ scaling     │  │
//! │         │  DistributionOptimizer ◄──────────┤ retuning    │  │
//! │         ▼                                   └─────────────┘  │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │ Task attempts (one tokio task each, timeout-bounded)│    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod metrics;
mod queue;
mod scaling;
mod shared;
mod state;
mod worker_pool;

pub use metrics::{PoolHealth, PoolMetrics, PoolTotals, WorkerSnapshot};
pub use scaling::{plan_scaling, ScalingPlan};
pub use worker_pool::{PoolError, WorkerPool};
