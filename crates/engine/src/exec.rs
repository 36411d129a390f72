use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{error, warn};

use crate::executor::{ExecutionContext, Executor};
use crate::outcome::TaskOutcome;
use crate::queue::OutputQueue;
use crate::task::Task;
use crate::worker::WorkerMetrics;

enum ExecItem {
    Run(Box<Task>),
    Stop,
}

/// Bounded set of long-lived execution threads inside one worker.
///
/// `submit` never drops a task; the worker loop is responsible for not
/// over-submitting past `max_threads`. Every execution publishes exactly one
/// outcome: user-code errors and panics become FAILED outcomes.
pub(crate) struct ExecPool {
    tx: Sender<ExecItem>,
    threads: Vec<JoinHandle<()>>,
    metrics: Arc<WorkerMetrics>,
}

impl ExecPool {
    pub(crate) fn start(
        worker_id: &str,
        max_threads: usize,
        output: Arc<OutputQueue>,
        executor: Arc<dyn Executor>,
        metrics: Arc<WorkerMetrics>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<ExecItem>();
        let mut threads = Vec::with_capacity(max_threads);
        for slot in 0..max_threads {
            let rx = rx.clone();
            let output = output.clone();
            let executor = executor.clone();
            let metrics = metrics.clone();
            let worker_id = worker_id.to_string();
            let handle = thread::Builder::new()
                .name(format!("{worker_id}-exec-{slot}"))
                .spawn(move || run_exec_loop(&worker_id, &rx, &output, &*executor, &metrics))?;
            threads.push(handle);
        }
        Ok(Self { tx, threads, metrics })
    }

    /// Queue a task for execution.
    pub(crate) fn submit(&self, task: Box<Task>) {
        self.metrics.pool_pending.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(ExecItem::Run(task));
    }

    /// Drain in-flight work and join every execution thread.
    pub(crate) fn shutdown(self) {
        for _ in &self.threads {
            let _ = self.tx.send(ExecItem::Stop);
        }
        for handle in self.threads {
            let _ = handle.join();
        }
    }
}

fn run_exec_loop(
    worker_id: &str,
    rx: &Receiver<ExecItem>,
    output: &OutputQueue,
    executor: &dyn Executor,
    metrics: &WorkerMetrics,
) {
    while let Ok(item) = rx.recv() {
        let task = match item {
            ExecItem::Stop => break,
            ExecItem::Run(task) => task,
        };
        // Active rises before pending falls so the worker's saturation
        // check never sees the task vanish from both counters at once.
        metrics.active_tasks.fetch_add(1, Ordering::SeqCst);
        metrics.pool_pending.fetch_sub(1, Ordering::SeqCst);

        let started_at = Utc::now();
        let started = Instant::now();
        let ctx = ExecutionContext {
            task_id: task.id.clone(),
            worker_id: worker_id.to_string(),
        };

        let run = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&task, &ctx)));
        let outcome = match run {
            Ok(Ok(data)) => TaskOutcome::success(task.id.clone(), data, started_at),
            Ok(Err(err)) => TaskOutcome::failed(task.id.clone(), err.to_string(), started_at),
            Err(payload) => {
                let message = panic_message(payload);
                error!(task_id = %task.id, %message, "user code panicked");
                TaskOutcome::failed(task.id.clone(), message, started_at)
            }
        };

        if !output.put(outcome) {
            warn!(task_id = %task.id, "output queue full, outcome dropped");
        }

        metrics
            .busy_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        metrics.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
