//! Adaptive task placement
//!
//! The [`DistributionOptimizer`] owns per-worker load scores, a bounded
//! history of task outcomes, and the active [`DistributionStrategy`]. The
//! pool feeds it worker observations and outcomes; it answers which idle
//! worker should receive the next task.

mod history;
mod optimizer;
mod strategy;

pub use history::{TaskHistory, TaskOutcome, WindowStats};
pub use optimizer::{
    DistributionMetrics, DistributionOptimizer, Imbalance, OptimizerConfig, WorkerMetrics,
    REBALANCE_DAMPING,
};
pub use strategy::{
    DistributionStrategy, LeastLoaded, LoadView, PlacementStrategy, PriorityBased, ResourceAware,
    RoundRobin,
};
