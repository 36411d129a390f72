use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// The user code returned a value.
    #[serde(rename = "SUCCESS")]
    Completed,
    /// The user code raised, panicked, or could not be invoked.
    #[serde(rename = "FAILED")]
    Failed,
}

/// The outcome of one task execution.
///
/// Exactly one of `data` (on success) or `error` (on failure) is meaningful.
/// Timestamps are UTC and serialize as RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Id of the task this outcome belongs to.
    pub task_id: String,
    /// Terminal status.
    pub status: OutcomeStatus,
    /// Output value of the user code; `Null` on failure.
    #[serde(default)]
    pub data: Value,
    /// Failure text; `None` on success.
    #[serde(default)]
    pub error: Option<String>,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When the outcome was produced. Never earlier than `started_at`.
    pub completed_at: DateTime<Utc>,
}

impl TaskOutcome {
    /// Build a successful outcome, stamping `completed_at` now.
    pub fn success(task_id: impl Into<String>, data: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            status: OutcomeStatus::Completed,
            data,
            error: None,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Build a failed outcome, stamping `completed_at` now.
    pub fn failed(
        task_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: OutcomeStatus::Failed,
            data: Value::Null,
            error: Some(error.into()),
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Whether the task completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }

    /// Wall-clock execution time.
    pub fn duration(&self) -> Duration {
        self.completed_at - self.started_at
    }

    /// Serialize into the wire form.
    pub fn to_wire(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Reconstruct from the wire form.
    pub fn from_wire(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}
