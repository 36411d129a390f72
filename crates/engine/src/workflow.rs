use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::outcome::TaskOutcome;
use crate::task::{Task, UPSTREAM_RESULTS_KEY};

/// Tracks inter-task dependencies and releases tasks whose predecessors have
/// all completed.
///
/// The graph is stored as forward adjacency (`children`) plus per-task
/// waiting counters; release work is pure counter decrements, never a graph
/// walk. Every operation runs under one lock and does no I/O.
pub(crate) struct WorkflowManager {
    inner: Mutex<WorkflowState>,
}

#[derive(Default)]
struct WorkflowState {
    /// Parked tasks by id.
    tasks: HashMap<String, Task>,
    /// Remaining unmet dependency count per parked task.
    waiting: HashMap<String, usize>,
    /// Forward adjacency: id of a predecessor to the ids that list it.
    children: HashMap<String, Vec<String>>,
    /// Outcome archive used to feed `upstream_results` into dependents.
    results: HashMap<String, TaskOutcome>,
}

impl WorkflowManager {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(WorkflowState::default()),
        }
    }

    /// Register a batch of tasks and their dependency edges atomically.
    pub(crate) fn add_workflow(&self, tasks: &[Task]) {
        let mut state = self.inner.lock();
        for task in tasks {
            state.waiting.insert(task.id.clone(), task.dependencies.len());
            for dep_id in &task.dependencies {
                state
                    .children
                    .entry(dep_id.clone())
                    .or_default()
                    .push(task.id.clone());
            }
            state.tasks.insert(task.id.clone(), task.clone());
        }
    }

    /// Remove and return every task whose waiting count is currently zero.
    pub(crate) fn ready_tasks(&self) -> Vec<Task> {
        let mut state = self.inner.lock();
        let ready_ids: Vec<String> = state
            .waiting
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut ready = Vec::with_capacity(ready_ids.len());
        for id in ready_ids {
            state.waiting.remove(&id);
            if let Some(task) = state.tasks.remove(&id) {
                ready.push(task);
            }
        }
        ready
    }

    /// Record a finished task and return the dependents it released.
    ///
    /// A FAILED predecessor releases its dependents like any other; the
    /// dependent sees `Null` under its id in `upstream_results`.
    pub(crate) fn task_completed(&self, outcome: &TaskOutcome) -> Vec<Task> {
        let mut state = self.inner.lock();
        state
            .results
            .insert(outcome.task_id.clone(), outcome.clone());

        let children = state
            .children
            .remove(&outcome.task_id)
            .unwrap_or_default();

        let mut released = Vec::new();
        for child_id in children {
            let Some(count) = state.waiting.get_mut(&child_id) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count > 0 {
                continue;
            }
            state.waiting.remove(&child_id);
            let Some(mut task) = state.tasks.remove(&child_id) else {
                continue;
            };

            let mut upstream = Map::new();
            for dep_id in &task.dependencies {
                if let Some(result) = state.results.get(dep_id) {
                    upstream.insert(dep_id.clone(), result.data.clone());
                }
            }
            task.params
                .insert(UPSTREAM_RESULTS_KEY.to_string(), Value::Object(upstream));
            released.push(task);
        }
        released
    }
}
