use serde::Serialize;
use serde_json::Value;

/// Health classification of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Operating normally.
    Healthy,
    /// Degraded or stopped.
    Unhealthy,
}

/// Snapshot of one engine component: its name, a coarse health flag, and a
/// metrics object whose key names are part of the public contract.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    /// Component name (`input_queue`, `output_queue`, `process_pool`).
    pub name: &'static str,
    /// Coarse health flag.
    pub health: HealthState,
    /// Component-specific metrics.
    pub metrics: Value,
}

/// Engine-level section of the status report.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    /// Whether `start` has completed and `shutdown` has not.
    pub is_running: bool,
}

/// Per-component sections of the status report. Components are absent while
/// the engine is stopped.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentReports {
    /// Task intake queue.
    pub input_queue: Option<ComponentStatus>,
    /// Outcome collection queue.
    pub output_queue: Option<ComponentStatus>,
    /// Worker pool. The key name is fixed; external tooling depends on it.
    pub process_pool: Option<ComponentStatus>,
}

/// Structured status report returned by [`Engine::get_status`](crate::Engine::get_status).
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Engine-level flags.
    pub engine: EngineInfo,
    /// Per-component snapshots.
    pub components: ComponentReports,
}

/// Per-worker row inside the pool metrics. Field names are part of the
/// public contract.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerMetricsSnapshot {
    /// Worker identifier, e.g. `cpu-0`.
    pub worker_id: String,
    /// Tasks currently executing inside the worker.
    pub active_tasks: usize,
    /// Commands waiting in the worker's own queue.
    pub queue_size: usize,
    /// Tasks handed to the worker's execution pool but not yet started.
    pub thread_pool_queue_size: usize,
    /// `active_tasks + queue_size + thread_pool_queue_size`.
    pub total_load: usize,
    /// Execution-slot utilization over the last heartbeat window, 0 to 100.
    pub cpu_percent: f32,
    /// Resident set size of the hosting process, in MiB.
    pub rss_mb: u64,
}
