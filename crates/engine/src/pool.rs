use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::{error, info, warn};

use crate::autoscaler::CpuPoolSnapshot;
use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::queue::OutputQueue;
use crate::status::{ComponentStatus, HealthState, WorkerMetricsSnapshot};
use crate::task::{Task, TaskType};
use crate::worker::{
    StealHandle, StealSet, WorkerCommand, WorkerMetrics, WorkerSpec, spawn_worker,
};

// How long shutdown waits for a worker to drain before detaching it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct WorkerHandle {
    worker_id: String,
    tx: Sender<WorkerCommand>,
    rx: Receiver<WorkerCommand>,
    metrics: Arc<WorkerMetrics>,
    join: Option<JoinHandle<()>>,
}

struct TypedWorkers {
    prefix: &'static str,
    max_threads: usize,
    next_seq: AtomicUsize,
    members: Mutex<Vec<WorkerHandle>>,
    retired: Mutex<Vec<WorkerHandle>>,
    steal: StealSet,
}

impl TypedWorkers {
    fn new(prefix: &'static str, max_threads: usize) -> Self {
        Self {
            prefix,
            max_threads,
            next_seq: AtomicUsize::new(0),
            members: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            steal: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

/// Owns the CPU-bound and I/O-bound worker sets: placement, scaling,
/// lifecycle, and pool-wide metrics.
pub(crate) struct WorkerPool {
    output: Arc<OutputQueue>,
    executor: Arc<dyn Executor>,
    cpu: TypedWorkers,
    io: TypedWorkers,
    initial_cpu_count: usize,
    initial_io_count: usize,
    nice_level: i32,
    core_ids: Vec<usize>,
    next_core: AtomicUsize,
    started: AtomicBool,
}

impl WorkerPool {
    pub(crate) fn new(
        config: &EngineConfig,
        output: Arc<OutputQueue>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            output,
            executor,
            cpu: TypedWorkers::new("cpu", config.cpu_bound_task_limit),
            io: TypedWorkers::new("io", config.io_bound_task_limit),
            initial_cpu_count: config.cpu_bound_count,
            initial_io_count: config.resolved_io_bound_count(),
            nice_level: config.worker_nice_level,
            core_ids: taskmill_affinity::host_core_ids(),
            next_core: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the initial worker sets.
    pub(crate) fn start(&self) {
        for _ in 0..self.initial_cpu_count {
            self.add_worker(TaskType::CpuBound);
        }
        for _ in 0..self.initial_io_count {
            self.add_worker(TaskType::IoBound);
        }
        self.started.store(true, Ordering::SeqCst);
        info!(
            cpu_workers = self.initial_cpu_count,
            io_workers = self.initial_io_count,
            "worker pool started"
        );
    }

    fn set(&self, task_type: TaskType) -> &TypedWorkers {
        match task_type {
            TaskType::CpuBound => &self.cpu,
            TaskType::IoBound => &self.io,
        }
    }

    fn next_core_id(&self) -> Option<usize> {
        if self.core_ids.is_empty() {
            return None;
        }
        let slot = self.next_core.fetch_add(1, Ordering::Relaxed);
        Some(self.core_ids[slot % self.core_ids.len()])
    }

    /// Place a task on the least-loaded worker of its type. Load is
    /// `active tasks + own queue length`; ties break on the lowest index.
    pub(crate) fn submit(&self, task: Task) -> bool {
        let set = self.set(task.task_type);
        let tx = {
            let members = set.members.lock();
            let mut best: Option<(usize, Sender<WorkerCommand>)> = None;
            for handle in members.iter() {
                let load = handle.metrics.active_tasks.load(Ordering::SeqCst) + handle.rx.len();
                if best.as_ref().is_none_or(|(min, _)| load < *min) {
                    best = Some((load, handle.tx.clone()));
                }
            }
            // The send happens after the membership lock is released so that
            // placement never serializes on channel backpressure.
            match best {
                Some((_, tx)) => tx,
                None => return false,
            }
        };
        tx.send(WorkerCommand::Execute(Box::new(task))).is_ok()
    }

    /// Spawn one additional worker of `task_type` and expose its queue to
    /// every sibling's steal set. Returns `false` when the spawn failed; the
    /// pool proceeds at its previous size.
    pub(crate) fn add_worker(&self, task_type: TaskType) -> bool {
        let set = self.set(task_type);
        let seq = set.next_seq.fetch_add(1, Ordering::SeqCst);
        let worker_id = format!("{}-{}", set.prefix, seq);
        let (tx, rx) = unbounded();
        let metrics = Arc::new(WorkerMetrics::default());
        let cpu_id = self.next_core_id();

        let spec = WorkerSpec {
            worker_id: worker_id.clone(),
            task_type,
            cpu_id,
            nice_level: self.nice_level,
            max_threads: set.max_threads,
        };
        let join = match spawn_worker(
            spec,
            rx.clone(),
            set.steal.clone(),
            self.output.clone(),
            self.executor.clone(),
            metrics.clone(),
        ) {
            Ok(join) => join,
            Err(err) => {
                error!(worker = %worker_id, %err, "failed to spawn worker");
                return false;
            }
        };

        set.steal.write().push(StealHandle {
            worker_id: worker_id.clone(),
            tx: tx.clone(),
            rx: rx.clone(),
        });
        set.members.lock().push(WorkerHandle {
            worker_id,
            tx,
            rx,
            metrics,
            join: Some(join),
        });
        true
    }

    /// Retire the most recently added worker of `task_type` (LIFO). The
    /// worker drains its execution pool before exiting; this call does not
    /// block on it. Its queue stays in the steal set so peers can help
    /// drain any backlog.
    pub(crate) fn remove_worker(&self, task_type: TaskType) -> bool {
        let set = self.set(task_type);
        let Some(handle) = set.members.lock().pop() else {
            return false;
        };
        info!(worker = %handle.worker_id, "retiring worker");
        let _ = handle.tx.send(WorkerCommand::Shutdown);
        set.retired.lock().push(handle);
        true
    }

    pub(crate) fn worker_count(&self, task_type: TaskType) -> usize {
        self.set(task_type).members.lock().len()
    }

    /// Load and utilization figures for the CPU-bound set, as consumed by
    /// the autoscaler.
    pub(crate) fn cpu_snapshot(&self) -> CpuPoolSnapshot {
        let members = self.cpu.members.lock();
        CpuPoolSnapshot {
            loads: members
                .iter()
                .map(|h| h.metrics.active_tasks.load(Ordering::SeqCst) + h.rx.len())
                .collect(),
            cpu_usages: members
                .iter()
                .map(|h| f64::from(h.metrics.cpu_percent()) / 100.0)
                .collect(),
        }
    }

    fn snapshots(&self, set: &TypedWorkers) -> Vec<WorkerMetricsSnapshot> {
        set.members
            .lock()
            .iter()
            .map(|handle| {
                let active = handle.metrics.active_tasks.load(Ordering::SeqCst);
                let queued = handle.rx.len();
                let pending = handle.metrics.pool_pending.load(Ordering::SeqCst);
                WorkerMetricsSnapshot {
                    worker_id: handle.worker_id.clone(),
                    active_tasks: active,
                    queue_size: queued,
                    thread_pool_queue_size: pending,
                    total_load: active + queued + pending,
                    cpu_percent: handle.metrics.cpu_percent(),
                    rss_mb: handle.metrics.rss_mb.load(Ordering::Relaxed),
                }
            })
            .collect()
    }

    pub(crate) fn status(&self) -> ComponentStatus {
        let cpu_workers = self.snapshots(&self.cpu);
        let io_workers = self.snapshots(&self.io);
        let cpu_load: usize = cpu_workers.iter().map(|w| w.total_load).sum();
        let io_load: usize = io_workers.iter().map(|w| w.total_load).sum();
        let started = self.started.load(Ordering::SeqCst);

        ComponentStatus {
            name: "process_pool",
            health: if started {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
            metrics: json!({
                "cpu_bound_workers": cpu_workers.len(),
                "io_bound_workers": io_workers.len(),
                "total_workers": cpu_workers.len() + io_workers.len(),
                "cpu_total_load": cpu_load,
                "io_total_load": io_load,
                "total_load": cpu_load + io_load,
                "workers": cpu_workers.iter().chain(io_workers.iter()).collect::<Vec<_>>(),
            }),
        }
    }

    /// Stop every worker: Shutdown on each queue, then a timed join, then
    /// detach whatever is still draining.
    pub(crate) fn shutdown(&self) {
        self.started.store(false, Ordering::SeqCst);
        for set in [&self.cpu, &self.io] {
            let mut all: Vec<WorkerHandle> = set.members.lock().drain(..).collect();
            for handle in &all {
                let _ = handle.tx.send(WorkerCommand::Shutdown);
            }
            all.extend(set.retired.lock().drain(..));

            for mut handle in all {
                let Some(join) = handle.join.take() else {
                    continue;
                };
                if !join_with_grace(join, SHUTDOWN_GRACE) {
                    warn!(
                        worker = %handle.worker_id,
                        "worker did not stop within the grace period, detaching"
                    );
                }
            }
            set.steal.write().clear();
        }
        info!("worker pool stopped");
    }
}

fn join_with_grace(handle: JoinHandle<()>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            // Threads cannot be killed; dropping the handle detaches it.
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::HandlerExecutor;
    use crate::outcome::OutcomeStatus;
    use serde_json::json;

    fn pool_fixture() -> (WorkerPool, Arc<OutputQueue>) {
        let mut config = EngineConfig::default();
        config.cpu_bound_count = 1;
        config.io_bound_count = Some(2);
        config.io_bound_task_limit = 4;

        let output = Arc::new(OutputQueue::new(64));
        let executor = HandlerExecutor::new()
            .with_handler("echo", |params, _| Ok(json!({ "params": params })))
            .with_handler("id", |_, ctx| Ok(json!({ "worker": ctx.worker_id })));
        let pool = WorkerPool::new(&config, output.clone(), Arc::new(executor));
        pool.start();
        (pool, output)
    }

    #[test]
    fn routes_by_task_type_and_publishes_outcomes() {
        let (pool, output) = pool_fixture();

        assert!(pool.submit(Task::new("id", TaskType::CpuBound)));
        assert!(pool.submit(Task::new("id", TaskType::IoBound)));

        let mut workers = Vec::new();
        for _ in 0..2 {
            let outcome = output.get(Duration::from_secs(5)).unwrap();
            assert_eq!(outcome.status, OutcomeStatus::Completed);
            workers.push(outcome.data["worker"].as_str().unwrap().to_string());
        }
        assert!(workers.iter().any(|w| w.starts_with("cpu-")));
        assert!(workers.iter().any(|w| w.starts_with("io-")));

        pool.shutdown();
    }

    #[test]
    fn scale_out_and_lifo_scale_in() {
        let (pool, _output) = pool_fixture();
        assert_eq!(pool.worker_count(TaskType::CpuBound), 1);

        assert!(pool.add_worker(TaskType::CpuBound));
        assert_eq!(pool.worker_count(TaskType::CpuBound), 2);
        assert_eq!(pool.cpu_snapshot().loads.len(), 2);

        assert!(pool.remove_worker(TaskType::CpuBound));
        assert_eq!(pool.worker_count(TaskType::CpuBound), 1);
        // The survivor is the oldest worker.
        let status = pool.status();
        let workers = status.metrics["workers"].as_array().unwrap();
        assert!(workers.iter().any(|w| w["worker_id"] == json!("cpu-0")));
        assert!(!workers.iter().any(|w| w["worker_id"] == json!("cpu-1")));

        pool.shutdown();
    }

    #[test]
    fn retired_workers_drain_their_backlog() {
        let (pool, output) = pool_fixture();
        for _ in 0..4 {
            assert!(pool.submit(Task::new("echo", TaskType::IoBound)));
        }
        pool.remove_worker(TaskType::IoBound);
        pool.remove_worker(TaskType::IoBound);

        for _ in 0..4 {
            let outcome = output.get(Duration::from_secs(5)).unwrap();
            assert_eq!(outcome.status, OutcomeStatus::Completed);
        }
        pool.shutdown();
    }

    #[test]
    fn status_reports_the_contract_metric_names() {
        let (pool, _output) = pool_fixture();
        let status = pool.status();
        assert_eq!(status.name, "process_pool");
        assert_eq!(status.health, HealthState::Healthy);
        assert_eq!(status.metrics["cpu_bound_workers"], json!(1));
        assert_eq!(status.metrics["io_bound_workers"], json!(2));

        let worker = &status.metrics["workers"][0];
        for key in [
            "worker_id",
            "active_tasks",
            "queue_size",
            "thread_pool_queue_size",
            "total_load",
            "cpu_percent",
        ] {
            assert!(worker.get(key).is_some(), "missing metric {key}");
        }
        pool.shutdown();
    }
}
