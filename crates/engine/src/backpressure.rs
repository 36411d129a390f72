use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

// Host metrics are sampled at most this often; in between, the cached
// verdict is returned.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Host health as seen by the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemHealth {
    Healthy,
    Warning,
    Critical,
}

/// Admission gate: samples host CPU% and memory% and refuses new
/// submissions while either crosses its threshold.
///
/// With the default thresholds of 100% the gate is effectively disabled but
/// still present and configurable.
pub(crate) struct BackpressureController {
    cpu_threshold: f32,
    mem_threshold: f32,
    state: Mutex<GateState>,
}

struct GateState {
    system: System,
    last_check: Option<Instant>,
    cached: SystemHealth,
}

impl BackpressureController {
    pub(crate) fn new(cpu_threshold: f32, mem_threshold: f32) -> Self {
        Self {
            cpu_threshold,
            mem_threshold,
            state: Mutex::new(GateState {
                system: System::new(),
                last_check: None,
                cached: SystemHealth::Healthy,
            }),
        }
    }

    pub(crate) fn health(&self) -> SystemHealth {
        let mut state = self.state.lock();
        if let Some(last) = state.last_check {
            if last.elapsed() < SAMPLE_INTERVAL {
                return state.cached;
            }
        }
        state.last_check = Some(Instant::now());

        state.system.refresh_cpu_usage();
        state.system.refresh_memory();
        let cpu = state.system.global_cpu_usage();
        let total = state.system.total_memory();
        let mem = if total == 0 {
            0.0
        } else {
            state.system.used_memory() as f32 / total as f32 * 100.0
        };

        state.cached = classify(cpu, mem, self.cpu_threshold, self.mem_threshold);
        debug!(cpu, mem, health = ?state.cached, "sampled host pressure");
        state.cached
    }

    /// Whether a new submission should be admitted right now.
    pub(crate) fn should_accept(&self) -> bool {
        self.health() != SystemHealth::Critical
    }
}

fn classify(cpu: f32, mem: f32, cpu_threshold: f32, mem_threshold: f32) -> SystemHealth {
    if cpu >= cpu_threshold || mem >= mem_threshold {
        SystemHealth::Critical
    } else if cpu >= cpu_threshold * 0.8 {
        SystemHealth::Warning
    } else {
        SystemHealth::Healthy
    }
}
