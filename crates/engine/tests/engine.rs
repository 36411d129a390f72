use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value, json};
use taskmill_engine::{
    Engine, EngineConfig, EngineError, ExecutorError, HandlerExecutor, OutcomeStatus, Task,
    TaskType, UPSTREAM_RESULTS_KEY,
};

fn handlers() -> Arc<HandlerExecutor> {
    Arc::new(
        HandlerExecutor::new()
            .with_handler("add", |params, _| {
                let x = params.get("x").and_then(Value::as_i64).unwrap_or(0);
                let y = params.get("y").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!({ "sum": x + y }))
            })
            .with_handler("boom", |_, _| Err(ExecutorError::Failed("boom".to_string())))
            .with_handler("echo", |params, _| Ok(Value::Object(params.clone())))
            .with_handler("noop", |_, _| Ok(Value::Null))
            .with_handler("nap", |params, _| {
                let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(50);
                thread::sleep(Duration::from_millis(ms));
                Ok(json!({ "slept_ms": ms }))
            }),
    )
}

fn small_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cpu_bound_count = 1;
    config.io_bound_count = Some(2);
    config.io_bound_task_limit = 4;
    config
}

fn started_engine() -> Engine {
    let engine = Engine::with_executor(small_config(), handlers()).unwrap();
    engine.start().unwrap();
    engine
}

fn params(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[test]
fn single_task_success() {
    let engine = started_engine();

    let task = Task::new("add", TaskType::CpuBound)
        .with_params(params(&[("x", json!(2)), ("y", json!(3))]));
    let id = engine.submit_task(task).unwrap();

    let outcome = engine
        .get_result(&id, Duration::from_secs(2))
        .unwrap()
        .expect("outcome within 2s");
    assert_eq!(outcome.task_id, id);
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.data["sum"], json!(5));
    assert!(outcome.error.is_none());

    engine.shutdown();
}

#[test]
fn user_error_becomes_failed_outcome() {
    let engine = started_engine();

    let id = engine.submit_task(Task::new("boom", TaskType::IoBound)).unwrap();
    let outcome = engine
        .get_result(&id, Duration::from_secs(2))
        .unwrap()
        .expect("outcome within 2s");
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("boom"));
    assert_eq!(outcome.data, Value::Null);

    engine.shutdown();
}

#[test]
fn dependency_chain_runs_in_causal_order() {
    let engine = started_engine();

    let a = Task::new("add", TaskType::CpuBound)
        .with_params(params(&[("x", json!(2)), ("y", json!(3))]));
    let b = Task::new("echo", TaskType::IoBound).with_dependencies(vec![a.id.clone()]);
    let c = Task::new("echo", TaskType::IoBound).with_dependencies(vec![b.id.clone()]);
    let (a_id, b_id, c_id) = (a.id.clone(), b.id.clone(), c.id.clone());

    let ids = engine.submit_workflow(vec![a, b, c]).unwrap();
    assert_eq!(ids, vec![a_id.clone(), b_id.clone(), c_id.clone()]);

    let a_out = engine.get_result(&a_id, Duration::from_secs(5)).unwrap().unwrap();
    let b_out = engine.get_result(&b_id, Duration::from_secs(5)).unwrap().unwrap();
    let c_out = engine.get_result(&c_id, Duration::from_secs(5)).unwrap().unwrap();

    assert!(a_out.completed_at <= b_out.started_at);
    assert!(b_out.completed_at <= c_out.started_at);

    // Each dependent saw its predecessor's data under upstream_results.
    assert_eq!(b_out.data[UPSTREAM_RESULTS_KEY][&a_id], json!({ "sum": 5 }));
    assert_eq!(c_out.data[UPSTREAM_RESULTS_KEY][&b_id], b_out.data);

    engine.shutdown();
}

#[test]
fn fan_out_fan_in_collects_every_branch() {
    let engine = started_engine();

    let source = Task::new("echo", TaskType::IoBound)
        .with_params(params(&[("seed", json!(1))]));
    let source_id = source.id.clone();

    let mut tasks = vec![source];
    let mut branch_ids = Vec::new();
    for _ in 0..10 {
        let branch =
            Task::new("echo", TaskType::IoBound).with_dependencies(vec![source_id.clone()]);
        branch_ids.push(branch.id.clone());
        tasks.push(branch);
    }
    let sink = Task::new("echo", TaskType::IoBound).with_dependencies(branch_ids.clone());
    let sink_id = sink.id.clone();
    tasks.push(sink);

    engine.submit_workflow(tasks).unwrap();

    let sink_out = engine
        .get_result(&sink_id, Duration::from_secs(10))
        .unwrap()
        .expect("sink completes");
    let upstream = sink_out.data[UPSTREAM_RESULTS_KEY].as_object().unwrap();
    assert_eq!(upstream.len(), 10);
    for branch_id in &branch_ids {
        assert!(upstream.contains_key(branch_id));
    }

    // Exactly one outcome per task: every id resolves once, and a second
    // read finds nothing.
    for id in branch_ids.iter().chain([&source_id]) {
        assert!(engine.get_result(id, Duration::from_secs(5)).unwrap().is_some());
        assert!(engine.get_result(id, Duration::ZERO).unwrap().is_none());
    }

    engine.shutdown();
}

#[test]
fn overflowing_the_intake_queue_reports_queue_full() {
    let mut config = small_config();
    config.input_queue_size = 1;
    let engine = Engine::with_executor(config, handlers()).unwrap();
    engine.start().unwrap();

    let mut accepted = 0u32;
    let mut refused = 0u32;
    for _ in 0..2000 {
        match engine.submit_task(Task::new("noop", TaskType::IoBound)) {
            Ok(_) => accepted += 1,
            Err(EngineError::QueueFull) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(accepted > 0);
    assert!(refused > 0, "a 1-slot queue must refuse under a submit storm");

    let status = engine.get_status();
    let metrics = &status.components.input_queue.as_ref().unwrap().metrics;
    assert!(metrics["total_dropped"].as_u64().unwrap() >= u64::from(refused));

    engine.shutdown();
}

#[test]
fn critical_host_pressure_refuses_submissions() {
    let mut config = small_config();
    config.backpressure_cpu_threshold = f32::MIN_POSITIVE;
    config.backpressure_mem_threshold = f32::MIN_POSITIVE;
    let engine = Engine::with_executor(config, handlers()).unwrap();
    engine.start().unwrap();

    assert!(matches!(
        engine.submit_task(Task::new("noop", TaskType::IoBound)),
        Err(EngineError::AdmissionRefused)
    ));

    // A refused submission never reaches the intake queue.
    let status = engine.get_status();
    let metrics = &status.components.input_queue.as_ref().unwrap().metrics;
    assert_eq!(metrics["total_put"], json!(0));

    engine.shutdown();
}

#[test]
fn get_result_with_zero_timeout_returns_immediately() {
    let engine = started_engine();
    let checked = std::time::Instant::now();
    let outcome = engine.get_result("no-such-task", Duration::ZERO).unwrap();
    assert!(outcome.is_none());
    assert!(checked.elapsed() < Duration::from_millis(500));
    engine.shutdown();
}

#[test]
fn api_requires_a_started_engine() {
    let engine = Engine::with_executor(small_config(), handlers()).unwrap();
    assert!(matches!(
        engine.submit_task(Task::new("noop", TaskType::IoBound)),
        Err(EngineError::NotStarted)
    ));
    assert!(matches!(
        engine.get_result("x", Duration::ZERO),
        Err(EngineError::NotStarted)
    ));
    assert!(!engine.get_status().engine.is_running);

    engine.start().unwrap();
    assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));
    assert!(engine.get_status().engine.is_running);

    engine.shutdown();
    assert!(matches!(
        engine.submit_task(Task::new("noop", TaskType::IoBound)),
        Err(EngineError::NotStarted)
    ));
}

#[test]
fn status_report_has_the_contract_shape() {
    let engine = started_engine();
    let id = engine.submit_task(Task::new("noop", TaskType::IoBound)).unwrap();
    engine.get_result(&id, Duration::from_secs(2)).unwrap().unwrap();

    let status = serde_json::to_value(engine.get_status()).unwrap();
    assert_eq!(status["engine"]["is_running"], json!(true));
    for component in ["input_queue", "output_queue", "process_pool"] {
        assert!(status["components"][component]["health"].is_string());
        assert!(status["components"][component]["metrics"].is_object());
    }
    let workers = status["components"]["process_pool"]["metrics"]["workers"]
        .as_array()
        .unwrap();
    assert_eq!(workers.len(), 3); // 1 cpu + 2 io
    for key in ["active_tasks", "queue_size", "thread_pool_queue_size", "total_load", "cpu_percent"] {
        assert!(workers[0].get(key).is_some(), "missing {key}");
    }

    engine.shutdown();
}

#[test]
fn sustained_cpu_backlog_scales_the_pool_out() {
    let engine = started_engine();

    // One CPU worker with a single slot and a deep backlog: its load crosses
    // the force threshold, so the controller must add a worker within a few
    // ticks. The newcomer drains the queue by stealing from the original.
    for _ in 0..40 {
        let task = Task::new("nap", TaskType::CpuBound)
            .with_params(params(&[("ms", json!(100))]));
        engine.submit_task(task).unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(25);
    let mut cpu_workers = 0u64;
    while std::time::Instant::now() < deadline {
        let status = engine.get_status();
        let metrics = &status.components.process_pool.as_ref().unwrap().metrics;
        cpu_workers = metrics["cpu_bound_workers"].as_u64().unwrap();
        if cpu_workers > 1 {
            break;
        }
        thread::sleep(Duration::from_millis(250));
    }
    assert!(cpu_workers > 1, "expected scale-out within 25s");

    engine.shutdown();
}

#[test]
fn concurrent_io_tasks_make_progress_together() {
    let engine = started_engine();

    // 8 naps across 2 io workers with 4 slots each: roughly one round.
    let started = std::time::Instant::now();
    let mut ids = Vec::new();
    for _ in 0..8 {
        let task = Task::new("nap", TaskType::IoBound)
            .with_params(params(&[("ms", json!(200))]));
        ids.push(engine.submit_task(task).unwrap());
    }
    for id in &ids {
        let outcome = engine.get_result(id, Duration::from_secs(10)).unwrap().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Completed);
    }
    // Serial execution would take 1.6s; concurrent slots should beat it
    // comfortably even on a loaded CI box.
    assert!(started.elapsed() < Duration::from_millis(1500));

    engine.shutdown();
}
