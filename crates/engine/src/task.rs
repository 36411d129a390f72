use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Reserved `params` key under which predecessor outputs are injected into a
/// dependent task before it is released.
pub const UPSTREAM_RESULTS_KEY: &str = "upstream_results";

/// Routing class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Compute-heavy work, routed to narrow, core-pinned workers.
    CpuBound,
    /// Wait-heavy work, routed to wide-concurrency workers.
    IoBound,
}

/// A unit of user-submitted work.
///
/// The engine core treats `script_path` as an opaque locator; only the
/// configured [`Executor`](crate::Executor) interprets it. The wire form uses
/// the reserved field names (`task_id`, `script_path`, `params`, `task_type`,
/// `max_retries`, `dependencies`); `created_at` is local bookkeeping and does
/// not cross queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable unique identifier, assigned at creation and never mutated.
    #[serde(rename = "task_id", default = "fresh_task_id")]
    pub id: String,
    /// Locator for the user code to run.
    pub script_path: String,
    /// Arbitrary parameters handed to the user code.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Routing class, fixed at creation.
    #[serde(default = "default_task_type")]
    pub task_type: TaskType,
    /// Retry budget carried on the wire. The engine records it but does not
    /// currently re-execute failures (see DESIGN.md).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Ids of tasks that must complete before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Creation time (UTC).
    #[serde(skip, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn fresh_task_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_task_type() -> TaskType {
    TaskType::IoBound
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    /// Create a task with a fresh id and empty parameters.
    pub fn new(script_path: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: fresh_task_id(),
            script_path: script_path.into(),
            params: Map::new(),
            task_type,
            max_retries: default_max_retries(),
            dependencies: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Replace the parameter map.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Replace the dependency list.
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Replace the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Serialize into the wire form.
    pub fn to_wire(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Reconstruct from the wire form. Missing optional fields fall back to
    /// their defaults; a missing `task_id` gets a fresh one.
    pub fn from_wire(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_round_trip_preserves_fields() {
        let mut params = Map::new();
        params.insert("x".to_string(), json!(2));
        let task = Task::new("scripts/add", TaskType::CpuBound)
            .with_params(params)
            .with_dependencies(vec!["a".to_string(), "b".to_string()])
            .with_max_retries(1);

        let decoded = Task::from_wire(task.to_wire().unwrap()).unwrap();
        assert_eq!(decoded.id, task.id);
        assert_eq!(decoded.script_path, task.script_path);
        assert_eq!(decoded.params, task.params);
        assert_eq!(decoded.task_type, task.task_type);
        assert_eq!(decoded.max_retries, task.max_retries);
        assert_eq!(decoded.dependencies, task.dependencies);
    }

    #[test]
    fn wire_field_names_are_reserved_ones() {
        let task = Task::new("scripts/noop", TaskType::IoBound);
        let wire = task.to_wire().unwrap();
        let obj = wire.as_object().unwrap();
        for key in ["task_id", "script_path", "params", "task_type", "max_retries", "dependencies"] {
            assert!(obj.contains_key(key), "missing wire field {key}");
        }
        assert!(!obj.contains_key("created_at"));
        assert_eq!(wire["task_type"], json!("io_bound"));
    }

    #[test]
    fn sparse_wire_records_get_defaults() {
        let decoded = Task::from_wire(json!({ "script_path": "scripts/x" })).unwrap();
        assert!(!decoded.id.is_empty());
        assert_eq!(decoded.task_type, TaskType::IoBound);
        assert_eq!(decoded.max_retries, 3);
        assert!(decoded.dependencies.is_empty());
        assert!(decoded.params.is_empty());
    }
}
