use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::autoscaler::{Autoscaler, ScaleAction, TICK};
use crate::backpressure::BackpressureController;
use crate::cache::ShardedResultCache;
use crate::config::{EngineConfig, host_cores};
use crate::error::EngineError;
use crate::executor::{Executor, ScriptExecutor};
use crate::outcome::TaskOutcome;
use crate::pool::WorkerPool;
use crate::queue::{InputQueue, OutputQueue};
use crate::status::{ComponentReports, EngineInfo, EngineStatus};
use crate::task::{Task, TaskType};
use crate::workflow::WorkflowManager;

// Result-router poll and get_result cache poll cadence.
const ROUTER_POLL: Duration = Duration::from_millis(100);
const RESULT_POLL: Duration = Duration::from_millis(10);
// Shutdown-flag check cadence inside the autoscaler's tick sleep.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

struct Running {
    input: Arc<InputQueue>,
    output: Arc<OutputQueue>,
    pool: Arc<WorkerPool>,
    workflow: Arc<WorkflowManager>,
    cache: Arc<ShardedResultCache>,
    gate: BackpressureController,
    pending: Mutex<HashSet<String>>,
}

/// Central facade: accepts tasks and workflows, routes them through the
/// worker pool, and serves outcomes back from the sharded cache.
///
/// `start` wires the queues and worker pool and launches three coordinator
/// threads (dispatcher, result router, autoscaler); `shutdown` reverses it
/// with a bounded grace period. Both are safe to call from any thread.
pub struct Engine {
    config: EngineConfig,
    executor: Arc<dyn Executor>,
    running: RwLock<Option<Arc<Running>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown_flag: Arc<AtomicBool>,
}

impl Engine {
    /// Create an engine using the default [`ScriptExecutor`].
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_executor(config, Arc::new(ScriptExecutor::new()))
    }

    /// Create an engine that invokes user code through `executor`.
    pub fn with_executor(
        config: EngineConfig,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            running: RwLock::new(None),
            threads: Mutex::new(Vec::new()),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start the engine. Fails with [`EngineError::AlreadyStarted`] when it
    /// is already running.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut slot = self.running.write();
        if slot.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        self.shutdown_flag.store(false, Ordering::SeqCst);

        let input = Arc::new(InputQueue::new(self.config.input_queue_size));
        let output = Arc::new(OutputQueue::new(self.config.output_queue_size));
        let pool = Arc::new(WorkerPool::new(
            &self.config,
            output.clone(),
            self.executor.clone(),
        ));
        pool.start();

        let running = Arc::new(Running {
            input,
            output,
            pool,
            workflow: Arc::new(WorkflowManager::new()),
            cache: Arc::new(ShardedResultCache::new(
                self.config.result_cache_shards,
                self.config.result_cache_shard_capacity,
            )),
            gate: BackpressureController::new(
                self.config.backpressure_cpu_threshold,
                self.config.backpressure_mem_threshold,
            ),
            pending: Mutex::new(HashSet::new()),
        });

        match self.spawn_coordinators(&running) {
            Ok(handles) => {
                self.threads.lock().extend(handles);
                *slot = Some(running);
                info!("engine started");
                Ok(())
            }
            Err(err) => {
                running.pool.shutdown();
                Err(err)
            }
        }
    }

    fn spawn_coordinators(
        &self,
        running: &Arc<Running>,
    ) -> Result<Vec<JoinHandle<()>>, EngineError> {
        let mut handles = Vec::with_capacity(3);
        match self.spawn_each(&mut handles, running) {
            Ok(()) => Ok(handles),
            Err(err) => {
                // Unwind whatever already started so no coordinator leaks.
                self.shutdown_flag.store(true, Ordering::SeqCst);
                for handle in handles {
                    let _ = handle.join();
                }
                Err(err)
            }
        }
    }

    fn spawn_each(
        &self,
        handles: &mut Vec<JoinHandle<()>>,
        running: &Arc<Running>,
    ) -> Result<(), EngineError> {
        let dispatcher = {
            let running = running.clone();
            let shutdown = self.shutdown_flag.clone();
            let poll = self.config.queue_poll_timeout;
            thread::Builder::new()
                .name("dispatcher".to_string())
                .spawn(move || dispatcher_loop(&running, &shutdown, poll))?
        };
        handles.push(dispatcher);

        let router = {
            let running = running.clone();
            let shutdown = self.shutdown_flag.clone();
            thread::Builder::new()
                .name("result-router".to_string())
                .spawn(move || router_loop(&running, &shutdown))?
        };
        handles.push(router);

        let scaler = {
            let running = running.clone();
            let shutdown = self.shutdown_flag.clone();
            let min_workers = self.config.cpu_bound_count;
            thread::Builder::new()
                .name("autoscaler".to_string())
                .spawn(move || autoscaler_loop(&running, &shutdown, min_workers))?
        };
        handles.push(scaler);

        Ok(())
    }

    /// Stop the engine: flag the coordinator loops, drain the worker pool
    /// with a grace period, and join everything. Idempotent.
    pub fn shutdown(&self) {
        let Some(running) = self.running.write().take() else {
            return;
        };
        self.shutdown_flag.store(true, Ordering::SeqCst);
        running.pool.shutdown();
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        info!("engine stopped");
    }

    /// Whether `start` has completed and `shutdown` has not.
    pub fn is_running(&self) -> bool {
        self.running.read().is_some()
    }

    fn require_running(&self) -> Result<Arc<Running>, EngineError> {
        self.running.read().clone().ok_or(EngineError::NotStarted)
    }

    /// Submit one task, returning its id.
    ///
    /// Fails with [`EngineError::AdmissionRefused`] under CRITICAL host
    /// pressure and [`EngineError::QueueFull`] when the intake queue is at
    /// capacity; both are retryable.
    pub fn submit_task(&self, task: Task) -> Result<String, EngineError> {
        let running = self.require_running()?;
        if !running.gate.should_accept() {
            return Err(EngineError::AdmissionRefused);
        }
        let id = task.id.clone();
        if !running.input.put(task) {
            return Err(EngineError::QueueFull);
        }
        running.pending.lock().insert(id.clone());
        Ok(id)
    }

    /// Submit a batch of interdependent tasks, returning every id in input
    /// order. Tasks with unmet dependencies are parked in the workflow
    /// manager and enter the intake queue only when released.
    pub fn submit_workflow(&self, tasks: Vec<Task>) -> Result<Vec<String>, EngineError> {
        let running = self.require_running()?;
        let ids: Vec<String> = tasks.iter().map(|task| task.id.clone()).collect();

        running.workflow.add_workflow(&tasks);
        {
            let mut pending = running.pending.lock();
            for id in &ids {
                pending.insert(id.clone());
            }
        }

        for task in running.workflow.ready_tasks() {
            if !running.gate.should_accept() {
                return Err(EngineError::AdmissionRefused);
            }
            if !running.input.put(task) {
                return Err(EngineError::QueueFull);
            }
        }
        Ok(ids)
    }

    /// Wait up to `timeout` for the outcome of `task_id`.
    ///
    /// Returns `Ok(None)` on timeout; a zero timeout checks the cache once.
    /// Task failure does not raise: it is carried inside the outcome.
    pub fn get_result(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Option<TaskOutcome>, EngineError> {
        let running = self.require_running()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = running.cache.take(task_id) {
                running.pending.lock().remove(task_id);
                return Ok(Some(outcome));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(RESULT_POLL);
        }
    }

    /// Structured status report. Component sections are present only while
    /// the engine runs.
    pub fn get_status(&self) -> EngineStatus {
        match self.running.read().as_ref() {
            Some(running) => EngineStatus {
                engine: EngineInfo { is_running: true },
                components: ComponentReports {
                    input_queue: Some(running.input.status()),
                    output_queue: Some(running.output.status()),
                    process_pool: Some(running.pool.status()),
                },
            },
            None => EngineStatus {
                engine: EngineInfo { is_running: false },
                components: ComponentReports {
                    input_queue: None,
                    output_queue: None,
                    process_pool: None,
                },
            },
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatcher_loop(running: &Running, shutdown: &AtomicBool, poll: Duration) {
    while !shutdown.load(Ordering::SeqCst) {
        let Some(task) = running.input.get(poll) else {
            continue;
        };
        let task_id = task.id.clone();
        if !running.pool.submit(task) {
            error!(task_id, "worker pool rejected task");
        }
    }
}

fn router_loop(running: &Running, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        let Some(outcome) = running.output.get(ROUTER_POLL) else {
            continue;
        };
        running.cache.put(outcome.clone());

        // Released workflow tasks re-enter the intake queue directly: the
        // admission gate protects against new outside work, not the
        // continuation of an already-accepted workflow.
        for task in running.workflow.task_completed(&outcome) {
            let task_id = task.id.clone();
            if !running.input.put(task) {
                error!(task_id, "input queue full, dropping released workflow task");
            }
        }
    }
}

fn autoscaler_loop(running: &Running, shutdown: &AtomicBool, min_workers: usize) {
    let mut scaler = Autoscaler::new(min_workers, host_cores());
    loop {
        let deadline = Instant::now() + TICK;
        while Instant::now() < deadline {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(SHUTDOWN_POLL);
        }

        let snapshot = running.pool.cpu_snapshot();
        match scaler.decide(&snapshot, Instant::now()) {
            Some(ScaleAction::AddCpuWorker) => {
                if !running.pool.add_worker(TaskType::CpuBound) {
                    warn!("scale-out failed, keeping current size");
                }
            }
            Some(ScaleAction::RemoveCpuWorker) => {
                if !running.pool.remove_worker(TaskType::CpuBound) {
                    warn!("scale-in failed, keeping current size");
                }
            }
            None => {}
        }
    }
}
