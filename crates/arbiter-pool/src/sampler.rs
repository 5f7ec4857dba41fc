//! Resource sampling
//!
//! The pool never probes the OS directly. Worker CPU/memory readings and the
//! host-wide pressure check come from an injected [`ResourceSampler`], so
//! scaling and placement can be driven by fixed readings in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::worker::WorkerId;

/// A CPU/memory reading, both as fractions in `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: f64,
    pub memory: f64,
}

impl ResourceUsage {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            cpu: clamp_fraction(cpu),
            memory: clamp_fraction(memory),
        }
    }

    /// Whether either reading is above its threshold
    pub fn exceeds(&self, cpu_threshold: f64, memory_threshold: f64) -> bool {
        self.cpu > cpu_threshold || self.memory > memory_threshold
    }
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Sampler errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SamplerError {
    /// The probe refused to track a new worker
    #[error("resource probe rejected {worker_id}: {reason}")]
    Rejected { worker_id: WorkerId, reason: String },
}

/// Source of worker and host resource readings
pub trait ResourceSampler: Send + Sync {
    /// Begin tracking a newly created worker
    fn attach(&self, _worker_id: WorkerId) -> Result<(), SamplerError> {
        Ok(())
    }

    /// Current reading for a worker; `None` means the worker did not respond
    fn sample(&self, worker_id: WorkerId) -> Option<ResourceUsage>;

    /// Host-wide reading
    fn system(&self) -> ResourceUsage;

    /// Stop tracking a destroyed worker
    fn detach(&self, _worker_id: WorkerId) {}
}

/// OS-backed sampler
///
/// Workers are in-process slots, so every worker reports the host-wide
/// reading. Refreshes are rate-limited because sysinfo needs a gap between
/// CPU refreshes to produce meaningful deltas.
pub struct SystemSampler {
    probe: Mutex<SystemProbe>,
}

struct SystemProbe {
    system: System,
    min_refresh: Duration,
    last: Option<(Instant, ResourceUsage)>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(MemoryRefreshKind::new().with_ram()),
        );

        Self {
            probe: Mutex::new(SystemProbe {
                system,
                min_refresh: sysinfo::MINIMUM_CPU_UPDATE_INTERVAL,
                last: None,
            }),
        }
    }

    fn read(&self) -> ResourceUsage {
        let mut probe = self.probe.lock();
        if let Some((at, usage)) = probe.last {
            if at.elapsed() < probe.min_refresh {
                return usage;
            }
        }

        probe.system.refresh_cpu_usage();
        probe.system.refresh_memory();

        let cpu = f64::from(probe.system.global_cpu_usage()) / 100.0;
        let total = probe.system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            probe.system.used_memory() as f64 / total as f64
        };

        let usage = ResourceUsage::new(cpu, memory);
        probe.last = Some((Instant::now(), usage));
        usage
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self, _worker_id: WorkerId) -> Option<ResourceUsage> {
        Some(self.read())
    }

    fn system(&self) -> ResourceUsage {
        self.read()
    }
}

/// Sampler returning configured readings
///
/// # Example
///
/// ```
/// use arbiter_pool::{ResourceSampler, ResourceUsage, StaticSampler, WorkerId};
///
/// let sampler = StaticSampler::new(ResourceUsage::new(0.2, 0.3));
/// sampler.set_worker(WorkerId::new(1), ResourceUsage::new(0.9, 0.9));
///
/// assert_eq!(sampler.sample(WorkerId::new(0)), Some(ResourceUsage::new(0.2, 0.3)));
/// assert_eq!(sampler.sample(WorkerId::new(1)), Some(ResourceUsage::new(0.9, 0.9)));
/// ```
pub struct StaticSampler {
    default: Mutex<ResourceUsage>,
    system: Mutex<ResourceUsage>,
    overrides: Mutex<HashMap<WorkerId, Option<ResourceUsage>>>,
    reject_attach: AtomicBool,
}

impl StaticSampler {
    pub fn new(default: ResourceUsage) -> Self {
        Self {
            default: Mutex::new(default),
            system: Mutex::new(default),
            overrides: Mutex::new(HashMap::new()),
            reject_attach: AtomicBool::new(false),
        }
    }

    /// Set the reading reported for workers without an override
    pub fn set_default(&self, usage: ResourceUsage) {
        *self.default.lock() = usage;
    }

    /// Set the host-wide reading
    pub fn set_system(&self, usage: ResourceUsage) {
        *self.system.lock() = usage;
    }

    /// Set the reading for one worker
    pub fn set_worker(&self, worker_id: WorkerId, usage: ResourceUsage) {
        self.overrides.lock().insert(worker_id, Some(usage));
    }

    /// Make a worker stop answering samples
    pub fn silence(&self, worker_id: WorkerId) {
        self.overrides.lock().insert(worker_id, None);
    }

    /// Make subsequent worker creation fail
    pub fn reject_attach(&self, reject: bool) {
        self.reject_attach.store(reject, Ordering::Relaxed);
    }
}

impl Default for StaticSampler {
    fn default() -> Self {
        Self::new(ResourceUsage::default())
    }
}

impl ResourceSampler for StaticSampler {
    fn attach(&self, worker_id: WorkerId) -> Result<(), SamplerError> {
        if self.reject_attach.load(Ordering::Relaxed) {
            return Err(SamplerError::Rejected {
                worker_id,
                reason: "attach rejected".into(),
            });
        }
        Ok(())
    }

    fn sample(&self, worker_id: WorkerId) -> Option<ResourceUsage> {
        match self.overrides.lock().get(&worker_id) {
            Some(reading) => *reading,
            None => Some(*self.default.lock()),
        }
    }

    fn system(&self) -> ResourceUsage {
        *self.system.lock()
    }

    fn detach(&self, worker_id: WorkerId) {
        self.overrides.lock().remove(&worker_id);
    }
}
