use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, error, info};

use taskmill_affinity::{pin_current_thread, renice_current_thread};

use crate::exec::ExecPool;
use crate::executor::Executor;
use crate::queue::OutputQueue;
use crate::task::{Task, TaskType};

// Idle backoff when neither the own queue nor stealing yields work. Kept
// short: stealing demands low pickup latency.
const IDLE_SLEEP: Duration = Duration::from_millis(1);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Command records carried on per-worker queues.
pub(crate) enum WorkerCommand {
    /// Run this task on the worker's execution pool.
    Execute(Box<Task>),
    /// Drain the execution pool and exit the worker loop.
    Shutdown,
}

/// Shared per-worker counters, written by the worker and its execution
/// threads, read by placement, the autoscaler, and the status report.
#[derive(Default)]
pub(crate) struct WorkerMetrics {
    /// Tasks currently executing.
    pub(crate) active_tasks: AtomicUsize,
    /// Tasks submitted to the execution pool but not yet taken.
    pub(crate) pool_pending: AtomicUsize,
    /// Execution-slot utilization over the last heartbeat window, in
    /// hundredths of a percent.
    pub(crate) cpu_centi_percent: AtomicU32,
    /// Resident set of the hosting process, MiB.
    pub(crate) rss_mb: AtomicU64,
    /// Accumulated execution wall time, microseconds.
    pub(crate) busy_micros: AtomicU64,
}

impl WorkerMetrics {
    pub(crate) fn cpu_percent(&self) -> f32 {
        self.cpu_centi_percent.load(Ordering::Relaxed) as f32 / 100.0
    }
}

/// A sibling queue handle, visible to peers for stealing.
#[derive(Clone)]
pub(crate) struct StealHandle {
    pub(crate) worker_id: String,
    pub(crate) tx: Sender<WorkerCommand>,
    pub(crate) rx: Receiver<WorkerCommand>,
}

/// The shared steal set of one worker type. Scale-out pushes new handles
/// here, which makes them visible to every sibling at once.
pub(crate) type StealSet = Arc<RwLock<Vec<StealHandle>>>;

pub(crate) struct WorkerSpec {
    pub(crate) worker_id: String,
    pub(crate) task_type: TaskType,
    pub(crate) cpu_id: Option<usize>,
    pub(crate) nice_level: i32,
    pub(crate) max_threads: usize,
}

/// Spawn the long-lived worker thread.
pub(crate) fn spawn_worker(
    spec: WorkerSpec,
    queue_rx: Receiver<WorkerCommand>,
    siblings: StealSet,
    output: Arc<OutputQueue>,
    executor: Arc<dyn Executor>,
    metrics: Arc<WorkerMetrics>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(spec.worker_id.clone())
        .spawn(move || run_worker(spec, queue_rx, siblings, output, executor, metrics))
}

fn run_worker(
    spec: WorkerSpec,
    queue_rx: Receiver<WorkerCommand>,
    siblings: StealSet,
    output: Arc<OutputQueue>,
    executor: Arc<dyn Executor>,
    metrics: Arc<WorkerMetrics>,
) {
    renice_current_thread(spec.nice_level);
    if let Some(cpu_id) = spec.cpu_id {
        pin_current_thread(cpu_id);
    }

    let pool = match ExecPool::start(
        &spec.worker_id,
        spec.max_threads,
        output,
        executor,
        metrics.clone(),
    ) {
        Ok(pool) => pool,
        Err(err) => {
            error!(worker = %spec.worker_id, %err, "failed to start execution pool");
            return;
        }
    };

    info!(
        worker = %spec.worker_id,
        task_type = ?spec.task_type,
        cpu_id = ?spec.cpu_id,
        max_threads = spec.max_threads,
        "worker started"
    );

    let mut heartbeat = Heartbeat::new(spec.max_threads, metrics.clone());
    loop {
        heartbeat.maybe_sample();

        // Admission control: while either the pending backlog or the active
        // count has reached the slot limit, take no new work. Backlog stays
        // on worker queues where peers can steal it.
        if metrics.pool_pending.load(Ordering::SeqCst) >= spec.max_threads
            || metrics.active_tasks.load(Ordering::SeqCst) >= spec.max_threads
        {
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        // Own queue first.
        match queue_rx.try_recv() {
            Ok(WorkerCommand::Execute(task)) => {
                pool.submit(task);
                continue;
            }
            Ok(WorkerCommand::Shutdown) => break,
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        match steal_once(&spec.worker_id, &siblings) {
            Some(task) => pool.submit(task),
            None => thread::sleep(IDLE_SLEEP),
        }
    }

    info!(worker = %spec.worker_id, "worker draining");
    pool.shutdown();
    info!(worker = %spec.worker_id, "worker stopped");
}

/// One steal scan: snapshot sibling queue lengths, visit the fullest first,
/// and take the first task found. A stolen `Shutdown` belongs to the
/// victim's owner and is sent back.
fn steal_once(own_id: &str, siblings: &StealSet) -> Option<Box<Task>> {
    let mut victims: Vec<(usize, StealHandle)> = siblings
        .read()
        .iter()
        .filter(|handle| handle.worker_id != own_id)
        .map(|handle| (handle.rx.len(), handle.clone()))
        .filter(|(len, _)| *len > 0)
        .collect();
    if victims.is_empty() {
        return None;
    }
    victims.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, victim) in victims {
        match victim.rx.try_recv() {
            Ok(WorkerCommand::Execute(task)) => {
                debug!(thief = own_id, victim = %victim.worker_id, "stole task");
                return Some(task);
            }
            Ok(WorkerCommand::Shutdown) => {
                let _ = victim.tx.send(WorkerCommand::Shutdown);
            }
            Err(_) => {}
        }
    }
    None
}

struct Heartbeat {
    max_threads: usize,
    metrics: Arc<WorkerMetrics>,
    last_at: Instant,
    last_busy_micros: u64,
    system: System,
    pid: Pid,
}

impl Heartbeat {
    fn new(max_threads: usize, metrics: Arc<WorkerMetrics>) -> Self {
        Self {
            max_threads,
            metrics,
            last_at: Instant::now(),
            last_busy_micros: 0,
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    fn maybe_sample(&mut self) {
        let elapsed = self.last_at.elapsed();
        if elapsed < HEARTBEAT_INTERVAL {
            return;
        }

        let busy = self.metrics.busy_micros.load(Ordering::Relaxed);
        let capacity = elapsed.as_micros() as u64 * self.max_threads as u64;
        let percent = if capacity == 0 {
            0.0
        } else {
            (busy.saturating_sub(self.last_busy_micros) as f64 / capacity as f64 * 100.0).min(100.0)
        };
        self.metrics
            .cpu_centi_percent
            .store((percent * 100.0) as u32, Ordering::Relaxed);

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        if let Some(process) = self.system.process(self.pid) {
            self.metrics
                .rss_mb
                .store(process.memory() / (1024 * 1024), Ordering::Relaxed);
        }

        self.last_at = Instant::now();
        self.last_busy_micros = busy;
    }
}
