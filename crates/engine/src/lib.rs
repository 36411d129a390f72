#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Multi-tier task execution engine.
//!
//! Submitted tasks pass an admission gate, wait in a bounded intake queue,
//! and are placed on the least-loaded worker of their declared type
//! (CPU-bound or I/O-bound). Each worker is a long-lived OS thread pinned to
//! a core, owns a FIFO command queue that peers may steal from, and runs
//! user code on a bounded pool of execution threads. Outcomes flow through
//! an output queue into a sharded cache; a workflow manager releases
//! dependent tasks as their predecessors finish, and a load-based autoscaler
//! grows and shrinks the CPU-bound set.
//!
//! ```no_run
//! use taskmill_engine::{Engine, EngineConfig, Task, TaskType};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), taskmill_engine::EngineError> {
//! let engine = Engine::new(EngineConfig::default())?;
//! engine.start()?;
//!
//! let task = Task::new("scripts/checksum", TaskType::CpuBound);
//! let id = engine.submit_task(task)?;
//! let outcome = engine.get_result(&id, Duration::from_secs(5))?;
//! println!("{outcome:?}");
//!
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```

mod autoscaler;
mod backpressure;
mod cache;
mod config;
mod engine;
mod error;
mod exec;
mod executor;
mod outcome;
mod pool;
mod queue;
mod status;
mod task;
mod worker;
mod workflow;

pub use config::{EngineConfig, LogLevel};
pub use engine::Engine;
pub use error::EngineError;
pub use executor::{ExecutionContext, Executor, ExecutorError, Handler, HandlerExecutor, ScriptExecutor};
pub use outcome::{OutcomeStatus, TaskOutcome};
pub use status::{
    ComponentReports, ComponentStatus, EngineInfo, EngineStatus, HealthState,
    WorkerMetricsSnapshot,
};
pub use task::{Task, TaskType, UPSTREAM_RESULTS_KEY};
