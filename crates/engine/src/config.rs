use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Log verbosity recognized by [`EngineConfig`].
///
/// `Critical` maps to the `error` filter when handed to a subscriber; the
/// engine itself never logs above `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Everything, including per-task tracing.
    Debug,
    /// Lifecycle and scaling decisions.
    Info,
    /// Degraded-but-running conditions.
    Warning,
    /// Failures the engine survived.
    Error,
    /// Alias for `Error` kept for configuration compatibility.
    Critical,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!(
                "invalid log level {other:?} (expected DEBUG, INFO, WARNING, ERROR, or CRITICAL)"
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Engine configuration.
///
/// Defaults are usable as-is; `validate` is called by
/// [`Engine::new`](crate::Engine::new) and rejects zero-valued counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the task intake queue.
    pub input_queue_size: usize,
    /// Capacity of the outcome collection queue.
    pub output_queue_size: usize,
    /// CPU-bound workers at startup; also the autoscaler's floor.
    pub cpu_bound_count: usize,
    /// I/O-bound workers at startup. `None` resolves to `host cores - 1`.
    pub io_bound_count: Option<usize>,
    /// Concurrent task limit inside each CPU-bound worker.
    pub cpu_bound_task_limit: usize,
    /// Concurrent task limit inside each I/O-bound worker.
    pub io_bound_task_limit: usize,
    /// Niceness applied to every worker thread (Linux, best effort).
    pub worker_nice_level: i32,
    /// Log verbosity.
    pub log_level: LogLevel,
    /// How long the dispatcher blocks on an empty input queue per poll.
    pub queue_poll_timeout: Duration,
    /// Host CPU% at which the admission gate turns CRITICAL. 100 disables it.
    pub backpressure_cpu_threshold: f32,
    /// Host memory% at which the admission gate turns CRITICAL. 100 disables it.
    pub backpressure_mem_threshold: f32,
    /// Number of result-cache shards.
    pub result_cache_shards: usize,
    /// Retained outcomes per cache shard before eviction.
    pub result_cache_shard_capacity: usize,
}

impl EngineConfig {
    /// Default intake queue capacity.
    pub const DEFAULT_INPUT_QUEUE_SIZE: usize = 1000;
    /// Default outcome queue capacity.
    pub const DEFAULT_OUTPUT_QUEUE_SIZE: usize = 10_000;
    /// Default CPU-bound worker count.
    pub const DEFAULT_CPU_BOUND_COUNT: usize = 1;
    /// Default per-worker concurrency for CPU-bound workers.
    pub const DEFAULT_CPU_BOUND_TASK_LIMIT: usize = 1;
    /// Default per-worker concurrency for I/O-bound workers.
    pub const DEFAULT_IO_BOUND_TASK_LIMIT: usize = 20;
    /// Default dispatcher poll timeout.
    pub const DEFAULT_QUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(1);
    /// Default result-cache shard count.
    pub const DEFAULT_CACHE_SHARDS: usize = 16;
    /// Default per-shard result-cache capacity.
    pub const DEFAULT_CACHE_SHARD_CAPACITY: usize = 256;

    /// The I/O-bound worker count after resolving the `host cores - 1` default.
    pub fn resolved_io_bound_count(&self) -> usize {
        self.io_bound_count
            .unwrap_or_else(|| host_cores().saturating_sub(1).max(1))
    }

    /// Check every numeric option. Counts and capacities must be at least 1;
    /// thresholds must be positive.
    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = [
            ("input_queue_size", self.input_queue_size),
            ("output_queue_size", self.output_queue_size),
            ("cpu_bound_count", self.cpu_bound_count),
            ("cpu_bound_task_limit", self.cpu_bound_task_limit),
            ("io_bound_task_limit", self.io_bound_task_limit),
            ("result_cache_shards", self.result_cache_shards),
            ("result_cache_shard_capacity", self.result_cache_shard_capacity),
        ];
        for (name, value) in positive {
            if value < 1 {
                return Err(EngineError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        if let Some(count) = self.io_bound_count {
            if count < 1 {
                return Err(EngineError::InvalidConfig(
                    "io_bound_count must be at least 1".to_string(),
                ));
            }
        }
        if self.queue_poll_timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "queue_poll_timeout must be positive".to_string(),
            ));
        }
        if self.backpressure_cpu_threshold <= 0.0 || self.backpressure_mem_threshold <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "backpressure thresholds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_queue_size: Self::DEFAULT_INPUT_QUEUE_SIZE,
            output_queue_size: Self::DEFAULT_OUTPUT_QUEUE_SIZE,
            cpu_bound_count: Self::DEFAULT_CPU_BOUND_COUNT,
            io_bound_count: None,
            cpu_bound_task_limit: Self::DEFAULT_CPU_BOUND_TASK_LIMIT,
            io_bound_task_limit: Self::DEFAULT_IO_BOUND_TASK_LIMIT,
            worker_nice_level: 0,
            log_level: LogLevel::Info,
            queue_poll_timeout: Self::DEFAULT_QUEUE_POLL_TIMEOUT,
            backpressure_cpu_threshold: 100.0,
            backpressure_mem_threshold: 100.0,
            result_cache_shards: Self::DEFAULT_CACHE_SHARDS,
            result_cache_shard_capacity: Self::DEFAULT_CACHE_SHARD_CAPACITY,
        }
    }
}

/// Number of logical CPUs on the host, at least 1.
pub(crate) fn host_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
