use std::time::{Duration, Instant};

use tracing::{debug, info};

/// How often the controller inspects the CPU-bound set.
pub(crate) const TICK: Duration = Duration::from_secs(5);

// A single worker whose load reaches this forces a scale-out.
const FORCE_LOAD_THRESHOLD: usize = 10;
// How long a forced scale-out keeps the controller in Pressure.
const PRESSURE_HOLD: Duration = Duration::from_secs(30);
// Minimum spacing between scale decisions.
const SCALE_COOLDOWN: Duration = Duration::from_secs(20);
// Normal-state scale-out: upper-quartile load and average utilization.
const SCALE_OUT_LOAD_THRESHOLD: f64 = 5.0;
const SCALE_OUT_CPU_THRESHOLD: f64 = 0.70;
// Normal-state scale-in: both signals must be low to avoid flapping.
const SCALE_IN_LOAD_THRESHOLD: f64 = 1.5;
const SCALE_IN_CPU_THRESHOLD: f64 = 0.40;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalerState {
    Normal,
    /// A worker crossed the force threshold; growth is prioritized.
    Pressure,
    /// A pressure episode just ended; decisions are blocked until spacing
    /// elapses.
    Cooldown,
}

/// A scaling decision for the CPU-bound worker set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScaleAction {
    AddCpuWorker,
    RemoveCpuWorker,
}

/// Per-worker load figures for the CPU-bound set at one instant.
pub(crate) struct CpuPoolSnapshot {
    /// `active tasks + own queue length` per worker.
    pub(crate) loads: Vec<usize>,
    /// Utilization per worker, 0.0 to 1.0.
    pub(crate) cpu_usages: Vec<f64>,
}

/// Load-based scaling controller for the CPU-bound worker set.
///
/// Pressure reacts to peak load so a single overloaded worker causes
/// growth; normal scale-out keys on the upper quartile, which resists
/// single-worker outliers; scale-in requires low load *and* low utilization.
pub(crate) struct Autoscaler {
    state: ScalerState,
    min_workers: usize,
    max_workers: usize,
    last_scale_at: Option<Instant>,
    pressure_until: Option<Instant>,
}

impl Autoscaler {
    pub(crate) fn new(min_workers: usize, host_cores: usize) -> Self {
        Self {
            state: ScalerState::Normal,
            min_workers: min_workers.max(1),
            max_workers: (host_cores * 2).max(1),
            last_scale_at: None,
            pressure_until: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ScalerState {
        self.state
    }

    /// Evaluate one tick against `snapshot`, advancing the state machine and
    /// returning at most one action.
    pub(crate) fn decide(
        &mut self,
        snapshot: &CpuPoolSnapshot,
        now: Instant,
    ) -> Option<ScaleAction> {
        let workers = snapshot.loads.len();
        if workers == 0 {
            return None;
        }

        let max_load = snapshot.loads.iter().copied().max().unwrap_or(0);
        let avg_load = snapshot.loads.iter().sum::<usize>() as f64 / workers as f64;
        let p75_load = percentile_75(&snapshot.loads);
        let avg_cpu = snapshot.cpu_usages.iter().sum::<f64>() / workers as f64;

        if max_load >= FORCE_LOAD_THRESHOLD {
            self.state = ScalerState::Pressure;
            self.pressure_until = Some(now + PRESSURE_HOLD);
        }
        match self.state {
            ScalerState::Pressure => {
                if self.pressure_until.is_some_and(|until| now >= until) {
                    self.state = ScalerState::Cooldown;
                    self.last_scale_at = Some(now);
                }
            }
            ScalerState::Cooldown => {
                if self
                    .last_scale_at
                    .is_none_or(|at| now.duration_since(at) >= SCALE_COOLDOWN)
                {
                    self.state = ScalerState::Normal;
                }
            }
            ScalerState::Normal => {}
        }

        debug!(
            state = ?self.state,
            max_load,
            avg_load,
            p75_load,
            avg_cpu,
            workers,
            "autoscaler tick"
        );

        if self
            .last_scale_at
            .is_some_and(|at| now.duration_since(at) < SCALE_COOLDOWN)
        {
            return None;
        }

        match self.state {
            ScalerState::Pressure => {
                if workers < self.max_workers {
                    self.last_scale_at = Some(now);
                    info!(max_load, workers, "pressure scale-out");
                    return Some(ScaleAction::AddCpuWorker);
                }
                None
            }
            ScalerState::Normal => {
                if p75_load as f64 > SCALE_OUT_LOAD_THRESHOLD
                    && avg_cpu > SCALE_OUT_CPU_THRESHOLD
                    && workers < self.max_workers
                {
                    self.last_scale_at = Some(now);
                    info!(p75_load, avg_cpu, workers, "scale-out");
                    Some(ScaleAction::AddCpuWorker)
                } else if avg_load < SCALE_IN_LOAD_THRESHOLD
                    && avg_cpu < SCALE_IN_CPU_THRESHOLD
                    && workers > self.min_workers
                {
                    self.last_scale_at = Some(now);
                    info!(avg_load, avg_cpu, workers, "scale-in");
                    Some(ScaleAction::RemoveCpuWorker)
                } else {
                    None
                }
            }
            ScalerState::Cooldown => None,
        }
    }
}

// Lower-rounding 75th percentile, so one hot worker among four does not read
// as pool-wide pressure.
fn percentile_75(loads: &[usize]) -> usize {
    let mut sorted = loads.to_vec();
    sorted.sort_unstable();
    sorted[(sorted.len() - 1) * 3 / 4]
}
