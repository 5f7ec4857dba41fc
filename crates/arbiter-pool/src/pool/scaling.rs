//! Scaling decisions
//!
//! Pure arithmetic over queue depth and worker counts; the pool applies the
//! resulting plan.

use crate::config::WorkerPoolConfig;

/// Outcome of one scaling check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingPlan {
    Hold,
    /// Add this many workers
    Grow(usize),
    /// Remove this many idle workers
    Shrink(usize),
}

/// Decide how to resize the pool
///
/// Grows when `queued > workers * scaling_factor` toward `ceil(queued / factor)`
/// workers, capped by `max_workers`. Shrinks when
/// `queued < workers / scaling_factor`, removing at most the idle workers
/// and never going below `min_workers`.
pub fn plan_scaling(
    queued: usize,
    workers: usize,
    idle: usize,
    config: &WorkerPoolConfig,
) -> ScalingPlan {
    let factor = config.scaling_factor;
    let q = queued as f64;
    let w = workers as f64;

    if q > w * factor && workers < config.max_workers {
        let target = (q / factor).ceil() as usize;
        let add = (config.max_workers - workers).min(target.saturating_sub(workers));
        if add > 0 {
            return ScalingPlan::Grow(add);
        }
    }

    if q < w / factor && workers > config.min_workers {
        let above_min = (workers - config.min_workers) as i64;
        let surplus = above_min.max(workers as i64 - (q * factor).ceil() as i64);
        let cap = above_min.min(idle as i64);
        let remove = surplus.clamp(0, cap.max(0)) as usize;
        if remove > 0 {
            return ScalingPlan::Shrink(remove);
        }
    }

    ScalingPlan::Hold
}
