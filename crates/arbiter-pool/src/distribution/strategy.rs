//! Placement strategies
//!
//! Each [`DistributionStrategy`] variant maps to one [`PlacementStrategy`]
//! implementation. The optimizer switches between them at runtime; callers
//! never configure the strategy directly.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::optimizer::WorkerMetrics;
use crate::task::{Task, TaskPriority};
use crate::worker::WorkerId;

/// Active placement rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    /// First idle worker in iteration order
    RoundRobin,
    /// Lowest load score
    LeastLoaded,
    /// Lowest (load, error rate) for critical tasks, least loaded otherwise
    PriorityBased,
    /// Lowest (cpu, memory, load)
    ResourceAware,
}

impl DistributionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastLoaded => "least_loaded",
            Self::PriorityBased => "priority_based",
            Self::ResourceAware => "resource_aware",
        }
    }

    /// Implementation of this rule
    pub fn placement(&self) -> &'static dyn PlacementStrategy {
        match self {
            Self::RoundRobin => &RoundRobin,
            Self::LeastLoaded => &LeastLoaded,
            Self::PriorityBased => &PriorityBased,
            Self::ResourceAware => &ResourceAware,
        }
    }
}

impl fmt::Display for DistributionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the optimizer's per-worker signals
///
/// Workers the optimizer has not observed yet score as unloaded but with the
/// worst possible error rate and resource readings.
#[derive(Debug, Clone, Copy)]
pub struct LoadView<'a> {
    loads: &'a BTreeMap<WorkerId, f64>,
    metrics: &'a BTreeMap<WorkerId, WorkerMetrics>,
}

impl<'a> LoadView<'a> {
    pub fn new(
        loads: &'a BTreeMap<WorkerId, f64>,
        metrics: &'a BTreeMap<WorkerId, WorkerMetrics>,
    ) -> Self {
        Self { loads, metrics }
    }

    pub fn load(&self, worker_id: WorkerId) -> f64 {
        self.loads.get(&worker_id).copied().unwrap_or(0.0)
    }

    pub fn error_rate(&self, worker_id: WorkerId) -> f64 {
        self.metrics.get(&worker_id).map_or(1.0, |m| m.error_rate)
    }

    pub fn cpu(&self, worker_id: WorkerId) -> f64 {
        self.metrics.get(&worker_id).map_or(1.0, |m| m.cpu_usage)
    }

    pub fn memory(&self, worker_id: WorkerId) -> f64 {
        self.metrics.get(&worker_id).map_or(1.0, |m| m.memory_usage)
    }
}

/// Picks one worker among idle candidates
pub trait PlacementStrategy: Send + Sync {
    /// Select a worker; ties resolve to the earliest candidate
    fn select(
        &self,
        task: &Task,
        candidates: &[WorkerId],
        view: &LoadView<'_>,
    ) -> Option<WorkerId>;

    fn name(&self) -> &str;
}

/// First minimum under a lexicographic key of floats
fn min_by_key<const N: usize>(
    candidates: &[WorkerId],
    key: impl Fn(WorkerId) -> [f64; N],
) -> Option<WorkerId> {
    candidates
        .iter()
        .copied()
        .map(|id| (id, key(id)))
        .min_by(|(_, a), (_, b)| {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        })
        .map(|(id, _)| id)
}

pub struct RoundRobin;

impl PlacementStrategy for RoundRobin {
    fn select(
        &self,
        _task: &Task,
        candidates: &[WorkerId],
        _view: &LoadView<'_>,
    ) -> Option<WorkerId> {
        candidates.first().copied()
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

pub struct LeastLoaded;

impl PlacementStrategy for LeastLoaded {
    fn select(
        &self,
        _task: &Task,
        candidates: &[WorkerId],
        view: &LoadView<'_>,
    ) -> Option<WorkerId> {
        min_by_key(candidates, |id| [view.load(id)])
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

pub struct PriorityBased;

impl PlacementStrategy for PriorityBased {
    fn select(
        &self,
        task: &Task,
        candidates: &[WorkerId],
        view: &LoadView<'_>,
    ) -> Option<WorkerId> {
        if task.priority == TaskPriority::Critical {
            min_by_key(candidates, |id| [view.load(id), view.error_rate(id)])
        } else {
            LeastLoaded.select(task, candidates, view)
        }
    }

    fn name(&self) -> &str {
        "PriorityBased"
    }
}

pub struct ResourceAware;

impl PlacementStrategy for ResourceAware {
    fn select(
        &self,
        _task: &Task,
        candidates: &[WorkerId],
        view: &LoadView<'_>,
    ) -> Option<WorkerId> {
        min_by_key(candidates, |id| [view.cpu(id), view.memory(id), view.load(id)])
    }

    fn name(&self) -> &str {
        "ResourceAware"
    }
}
