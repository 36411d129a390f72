use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::task::Task;

/// Identifies the execution site handed to user code.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    /// Id of the task being executed.
    pub task_id: String,
    /// Id of the worker executing it, e.g. `cpu-0`.
    pub worker_id: String,
}

/// Errors produced while invoking user code. These never reach the public
/// API; the execution pool turns them into FAILED outcomes.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// `script_path` does not resolve to a runnable script.
    #[error("script not found: {0}")]
    ScriptNotFound(String),
    /// Spawning or talking to the child process failed.
    #[error("script io failure: {0}")]
    Io(#[from] std::io::Error),
    /// The user code reported a failure.
    #[error("{0}")]
    Failed(String),
    /// No handler is registered under the task's `script_path`.
    #[error("no handler registered for {0:?}")]
    UnknownHandler(String),
}

/// Executes user code addressed by a task's `script_path`.
///
/// Implementations load, cache, and invalidate user code as they see fit;
/// the engine only requires that a task plus a context produce a value or an
/// error.
pub trait Executor: Send + Sync {
    /// Run the task and return its output value.
    fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<Value, ExecutorError>;
}

struct ResolvedScript {
    program: PathBuf,
    mtime: SystemTime,
}

/// Default executor: runs `script_path` as a child process.
///
/// The child receives `{"task_id", "worker_id", "params"}` as one JSON
/// document on stdin and must print its output value as JSON on stdout. A
/// nonzero exit status fails the task with the captured stderr. Resolved
/// program paths are cached per script and re-resolved when the file's
/// modification time changes.
pub struct ScriptExecutor {
    resolved: Mutex<HashMap<String, ResolvedScript>>,
}

impl ScriptExecutor {
    /// Create an executor with an empty resolution cache.
    pub fn new() -> Self {
        Self {
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, script_path: &str) -> Result<PathBuf, ExecutorError> {
        let metadata = std::fs::metadata(script_path)
            .map_err(|_| ExecutorError::ScriptNotFound(script_path.to_string()))?;
        let mtime = metadata.modified()?;

        let mut cache = self.resolved.lock();
        if let Some(entry) = cache.get(script_path) {
            if entry.mtime == mtime {
                return Ok(entry.program.clone());
            }
            debug!(script_path, "script changed on disk, re-resolving");
        }

        let program = Path::new(script_path).canonicalize()?;
        cache.insert(
            script_path.to_string(),
            ResolvedScript {
                program: program.clone(),
                mtime,
            },
        );
        Ok(program)
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ScriptExecutor {
    fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<Value, ExecutorError> {
        let program = self.resolve(&task.script_path)?;
        let request = json!({
            "task_id": ctx.task_id,
            "worker_id": ctx.worker_id,
            "params": Value::Object(task.params.clone()),
        });

        let mut child = Command::new(&program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.to_string().as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Failed(format!(
                "script exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout)
            .map_err(|err| ExecutorError::Failed(format!("script produced invalid json: {err}")))
    }
}

/// Handler function resolving a task's parameters into an output value.
pub type Handler =
    dyn Fn(&Map<String, Value>, &ExecutionContext) -> Result<Value, ExecutorError> + Send + Sync;

/// In-process executor resolving `script_path` against registered handlers.
///
/// Used where user code is native Rust: tests, the demo driver, and
/// embedders that do not want a subprocess boundary.
pub struct HandlerExecutor {
    handlers: HashMap<String, Arc<Handler>>,
}

impl HandlerExecutor {
    /// Create an executor with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous registration.
    pub fn with_handler(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&Map<String, Value>, &ExecutionContext) -> Result<Value, ExecutorError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }
}

impl Default for HandlerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for HandlerExecutor {
    fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<Value, ExecutorError> {
        let handler = self
            .handlers
            .get(&task.script_path)
            .ok_or_else(|| ExecutorError::UnknownHandler(task.script_path.clone()))?;
        handler(&task.params, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            task_id: "t-1".to_string(),
            worker_id: "cpu-0".to_string(),
        }
    }

    #[test]
    fn handler_executor_dispatches_by_script_path() {
        let executor = HandlerExecutor::new().with_handler("double", |params, _| {
            let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });

        let mut params = Map::new();
        params.insert("n".to_string(), json!(21));
        let task = Task::new("double", TaskType::CpuBound).with_params(params);
        assert_eq!(executor.execute(&task, &ctx()).unwrap(), json!(42));
    }

    #[test]
    fn unknown_handler_is_an_error() {
        let executor = HandlerExecutor::new();
        let task = Task::new("missing", TaskType::CpuBound);
        assert!(matches!(
            executor.execute(&task, &ctx()),
            Err(ExecutorError::UnknownHandler(_))
        ));
    }

    #[test]
    fn missing_script_is_reported_as_not_found() {
        let executor = ScriptExecutor::new();
        let task = Task::new("/definitely/not/here", TaskType::IoBound);
        assert!(matches!(
            executor.execute(&task, &ctx()),
            Err(ExecutorError::ScriptNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn script_executor_round_trips_json_through_a_child() {
        // `cat` echoes the request document, which is itself valid JSON.
        let executor = ScriptExecutor::new();
        let mut params = Map::new();
        params.insert("x".to_string(), json!(1));
        let task = Task::new("/bin/cat", TaskType::IoBound).with_params(params);

        let data = executor.execute(&task, &ctx()).unwrap();
        assert_eq!(data["params"]["x"], json!(1));
        assert_eq!(data["worker_id"], json!("cpu-0"));
    }
}
