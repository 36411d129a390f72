use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde_json::json;

use crate::outcome::TaskOutcome;
use crate::status::{ComponentStatus, HealthState};
use crate::task::Task;

// Queue health flips once this many submissions have been refused.
const UNHEALTHY_DROP_COUNT: u64 = 100;

/// Bounded FIFO of tasks awaiting dispatch.
///
/// Multi-producer (public API plus the result router re-entering released
/// workflow tasks), single consumer (the dispatcher). `put` never blocks; an
/// overflow is counted and reported to the caller.
pub(crate) struct InputQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
    max_size: usize,
    total_put: AtomicU64,
    total_dropped: AtomicU64,
}

impl InputQueue {
    pub(crate) fn new(max_size: usize) -> Self {
        let (tx, rx) = bounded(max_size);
        Self {
            tx,
            rx,
            max_size,
            total_put: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking. Returns `false` (and counts the drop) when
    /// the queue is at capacity.
    pub(crate) fn put(&self, task: Task) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => {
                self.total_put.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait up to `timeout` for a task.
    pub(crate) fn get(&self, timeout: Duration) -> Option<Task> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn status(&self) -> ComponentStatus {
        let size = self.len();
        let dropped = self.total_dropped();
        ComponentStatus {
            name: "input_queue",
            health: if dropped < UNHEALTHY_DROP_COUNT {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
            metrics: json!({
                "size": size,
                "max_size": self.max_size,
                "fullness": size as f64 / self.max_size as f64,
                "total_put": self.total_put.load(Ordering::Relaxed),
                "total_dropped": dropped,
            }),
        }
    }
}

/// Bounded FIFO of outcomes awaiting collection.
///
/// Multi-producer (every execution thread), consumed by the result router.
pub(crate) struct OutputQueue {
    tx: Sender<TaskOutcome>,
    rx: Receiver<TaskOutcome>,
    max_size: usize,
    total_put: AtomicU64,
    total_get: AtomicU64,
}

impl OutputQueue {
    pub(crate) fn new(max_size: usize) -> Self {
        let (tx, rx) = bounded(max_size);
        Self {
            tx,
            rx,
            max_size,
            total_put: AtomicU64::new(0),
            total_get: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking. Returns `false` when the queue is full.
    pub(crate) fn put(&self, outcome: TaskOutcome) -> bool {
        match self.tx.try_send(outcome) {
            Ok(()) => {
                self.total_put.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Wait up to `timeout` for an outcome.
    pub(crate) fn get(&self, timeout: Duration) -> Option<TaskOutcome> {
        let outcome = self.rx.recv_timeout(timeout).ok()?;
        self.total_get.fetch_add(1, Ordering::Relaxed);
        Some(outcome)
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn status(&self) -> ComponentStatus {
        ComponentStatus {
            name: "output_queue",
            health: HealthState::Healthy,
            metrics: json!({
                "size": self.len(),
                "max_size": self.max_size,
                "total_put": self.total_put.load(Ordering::Relaxed),
                "total_get": self.total_get.load(Ordering::Relaxed),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;
    use chrono::Utc;
    use serde_json::Value;

    fn task() -> Task {
        Task::new("scripts/noop", TaskType::IoBound)
    }

    #[test]
    fn input_overflow_is_counted_and_refused() {
        let queue = InputQueue::new(2);
        assert!(queue.put(task()));
        assert!(queue.put(task()));
        assert!(!queue.put(task()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.total_dropped(), 1);

        let metrics = queue.status().metrics;
        assert_eq!(metrics["total_put"], 2);
        assert_eq!(metrics["total_dropped"], 1);
        assert_eq!(metrics["fullness"], 1.0);
    }

    #[test]
    fn input_get_times_out_on_empty() {
        let queue = InputQueue::new(2);
        assert!(queue.get(Duration::from_millis(10)).is_none());

        queue.put(task());
        assert!(queue.get(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn input_queue_is_fifo() {
        let queue = InputQueue::new(8);
        let first = task();
        let second = task();
        let first_id = first.id.clone();
        queue.put(first);
        queue.put(second);
        assert_eq!(queue.get(Duration::ZERO).unwrap().id, first_id);
    }

    #[test]
    fn output_counters_track_put_and_get() {
        let queue = OutputQueue::new(4);
        queue.put(TaskOutcome::success("t-1", Value::Null, Utc::now()));
        queue.put(TaskOutcome::success("t-2", Value::Null, Utc::now()));
        assert!(queue.get(Duration::from_millis(10)).is_some());

        let metrics = queue.status().metrics;
        assert_eq!(metrics["total_put"], 2);
        assert_eq!(metrics["total_get"], 1);
        assert_eq!(metrics["size"], 1);
    }

    #[test]
    fn unhealthy_after_sustained_drops() {
        let queue = InputQueue::new(1);
        queue.put(task());
        for _ in 0..UNHEALTHY_DROP_COUNT {
            queue.put(task());
        }
        assert_eq!(queue.status().health, HealthState::Unhealthy);
    }
}
