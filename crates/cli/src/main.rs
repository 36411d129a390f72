mod cli;
mod demo;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskmill_engine::Engine;

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_level.as_filter_str()))
        .init();

    let engine = Engine::with_executor(cli.engine_config(), demo::handlers())?;
    engine.start()?;

    let result = demo::run(&engine, cli.tasks);

    if cli.status {
        let status = serde_json::to_string_pretty(&engine.get_status())?;
        println!("{status}");
    }

    engine.shutdown();
    result
}
