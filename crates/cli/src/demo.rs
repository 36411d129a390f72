use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::{Map, Value, json};
use tracing::info;

use taskmill_engine::{
    Engine, ExecutorError, HandlerExecutor, Task, TaskType, UPSTREAM_RESULTS_KEY,
};

const RESULT_WAIT: Duration = Duration::from_secs(30);

/// In-process demo workload: a CPU batch, an I/O batch, and a diamond
/// workflow that passes data through `upstream_results`.
pub fn handlers() -> Arc<HandlerExecutor> {
    Arc::new(
        HandlerExecutor::new()
            .with_handler("fibonacci", |params, _| {
                let n = params.get("n").and_then(Value::as_u64).unwrap_or(24);
                Ok(json!({ "n": n, "value": fibonacci(n) }))
            })
            .with_handler("fetch", |params, _| {
                let ms = params.get("latency_ms").and_then(Value::as_u64).unwrap_or(20);
                thread::sleep(Duration::from_millis(ms));
                Ok(json!({ "latency_ms": ms, "bytes": ms * 128 }))
            })
            .with_handler("extract", |_, _| {
                Ok(json!({ "records": (1..=8).collect::<Vec<u64>>() }))
            })
            .with_handler("transform", |params, _| {
                let factor = params.get("factor").and_then(Value::as_u64).unwrap_or(1);
                let records = upstream_records(params)?;
                let transformed: Vec<u64> = records.iter().map(|r| r * factor).collect();
                Ok(json!({ "records": transformed }))
            })
            .with_handler("combine", |params, _| {
                let upstream = params
                    .get(UPSTREAM_RESULTS_KEY)
                    .and_then(Value::as_object)
                    .ok_or_else(|| ExecutorError::Failed("no upstream results".to_string()))?;
                let total: u64 = upstream
                    .values()
                    .filter_map(|v| v.get("records"))
                    .filter_map(Value::as_array)
                    .flatten()
                    .filter_map(Value::as_u64)
                    .sum();
                Ok(json!({ "total": total, "sources": upstream.len() }))
            }),
    )
}

fn upstream_records(params: &Map<String, Value>) -> Result<Vec<u64>, ExecutorError> {
    let upstream = params
        .get(UPSTREAM_RESULTS_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| ExecutorError::Failed("no upstream results".to_string()))?;
    let first = upstream
        .values()
        .next()
        .ok_or_else(|| ExecutorError::Failed("empty upstream results".to_string()))?;
    Ok(first
        .get("records")
        .and_then(Value::as_array)
        .map(|records| records.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default())
}

fn fibonacci(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a.wrapping_add(b));
    }
    a
}

pub fn run(engine: &Engine, batch_size: usize) -> anyhow::Result<()> {
    run_batch(engine, "fibonacci", TaskType::CpuBound, batch_size, |i| {
        let mut params = Map::new();
        params.insert("n".to_string(), json!(20 + (i % 10) as u64));
        params
    })?;

    run_batch(engine, "fetch", TaskType::IoBound, batch_size, |i| {
        let mut params = Map::new();
        params.insert("latency_ms".to_string(), json!(10 + (i % 5) as u64 * 10));
        params
    })?;

    run_workflow(engine)?;
    Ok(())
}

fn run_batch(
    engine: &Engine,
    script: &str,
    task_type: TaskType,
    count: usize,
    params_for: impl Fn(usize) -> Map<String, Value>,
) -> anyhow::Result<()> {
    info!(script, count, "submitting batch");
    let started = Instant::now();

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let task = Task::new(script, task_type).with_params(params_for(i));
        ids.push(engine.submit_task(task)?);
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    for id in &ids {
        let outcome = engine
            .get_result(id, RESULT_WAIT)?
            .with_context(|| format!("no outcome for task {id} within {RESULT_WAIT:?}"))?;
        if outcome.is_success() {
            completed += 1;
        } else {
            failed += 1;
        }
    }

    println!(
        "{script}: {completed} completed, {failed} failed in {:?}",
        started.elapsed()
    );
    Ok(())
}

fn run_workflow(engine: &Engine) -> anyhow::Result<()> {
    info!("submitting diamond workflow");
    let started = Instant::now();

    let extract = Task::new("extract", TaskType::IoBound);
    let double = Task::new("transform", TaskType::CpuBound)
        .with_params(factor_params(2))
        .with_dependencies(vec![extract.id.clone()]);
    let triple = Task::new("transform", TaskType::CpuBound)
        .with_params(factor_params(3))
        .with_dependencies(vec![extract.id.clone()]);
    let combine = Task::new("combine", TaskType::CpuBound)
        .with_dependencies(vec![double.id.clone(), triple.id.clone()]);
    let combine_id = combine.id.clone();

    engine.submit_workflow(vec![extract, double, triple, combine])?;

    let outcome = engine
        .get_result(&combine_id, RESULT_WAIT)?
        .context("workflow sink produced no outcome")?;
    match outcome.error {
        None => println!(
            "workflow: total={} from {} sources in {:?}",
            outcome.data["total"], outcome.data["sources"], started.elapsed()
        ),
        Some(error) => println!("workflow failed: {error}"),
    }
    Ok(())
}

fn factor_params(factor: u64) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("factor".to_string(), json!(factor));
    params
}
