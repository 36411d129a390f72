use clap::Parser;

use taskmill_engine::{EngineConfig, LogLevel};

fn parse_log_level(input: &str) -> Result<LogLevel, String> {
    input.parse()
}

#[derive(Debug, Clone, Parser)]
#[command(name = "taskmill", version, about = "Multi-tier task execution engine demo driver")]
pub struct Cli {
    /// Number of CPU-bound workers at startup.
    #[arg(long, env = "TASKMILL_CPU_WORKERS", default_value_t = EngineConfig::DEFAULT_CPU_BOUND_COUNT)]
    pub cpu_workers: usize,

    /// Number of I/O-bound workers (default: host cores - 1).
    #[arg(long, env = "TASKMILL_IO_WORKERS")]
    pub io_workers: Option<usize>,

    /// Concurrent task limit per CPU-bound worker.
    #[arg(long, default_value_t = EngineConfig::DEFAULT_CPU_BOUND_TASK_LIMIT)]
    pub cpu_task_limit: usize,

    /// Concurrent task limit per I/O-bound worker.
    #[arg(long, default_value_t = EngineConfig::DEFAULT_IO_BOUND_TASK_LIMIT)]
    pub io_task_limit: usize,

    /// Tasks per demo batch.
    #[arg(short = 'n', long, default_value_t = 24)]
    pub tasks: usize,

    /// Log level: DEBUG, INFO, WARNING, ERROR, or CRITICAL.
    #[arg(
        long,
        env = "TASKMILL_LOG_LEVEL",
        default_value = "INFO",
        value_parser = parse_log_level
    )]
    pub log_level: LogLevel,

    /// Print the engine status report as JSON before shutdown.
    #[arg(long, default_value_t = false)]
    pub status: bool,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cpu_bound_count = self.cpu_workers;
        config.io_bound_count = self.io_workers;
        config.cpu_bound_task_limit = self.cpu_task_limit;
        config.io_bound_task_limit = self.io_task_limit;
        config.log_level = self.log_level;
        config
    }
}
