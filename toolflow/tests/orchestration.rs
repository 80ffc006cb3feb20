use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use toolflow::approval::{ApprovalGate, ApprovalOutcome, ApprovalPolicy};
use toolflow::config::EngineConfig;
use toolflow::engine::{
    BreakerConfig, CircuitState, CollectingSink, EngineError, ExecuteOptions, Orchestrator,
};
use toolflow::primitives::{CallId, ErrorCategory, ToolCall};
use toolflow::stream::event_channel;
use toolflow::tools::{ToolContract, ToolError, ToolRegistry};

fn call(id: &str, tool: &str, parameters: Value, deps: &[&str]) -> ToolCall {
    let mut builder = ToolCall::builder(CallId::new(id).unwrap(), tool).parameters(parameters);
    for dep in deps {
        builder = builder.depends_on_id(dep).unwrap();
    }
    builder.build().unwrap()
}

fn ids(level: &[CallId]) -> Vec<&str> {
    level.iter().map(CallId::as_str).collect()
}

/// Registers `name` as a tool that counts invocations and echoes its input.
fn counting_tool(registry: &ToolRegistry, contract: ToolContract) -> Arc<AtomicUsize> {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    registry
        .register_tool(contract, move |input: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "echo": input }))
            }
        })
        .unwrap();
    invocations
}

fn contract(name: &str) -> ToolContract {
    ToolContract::new(name, "1.0.0").unwrap()
}

#[tokio::test]
async fn independent_calls_share_a_level_and_outputs_flow_downstream() {
    let registry = Arc::new(ToolRegistry::new());
    counting_tool(&registry, contract("list_files"));
    counting_tool(&registry, contract("read_file"));
    counting_tool(&registry, contract("search_code"));
    let orchestrator = Orchestrator::builder(registry).build();

    let calls = vec![
        call("a", "list_files", json!({ "dir": "src" }), &[]),
        call("b", "read_file", json!({ "path": "${a.echo.dir}/lib.rs" }), &["a"]),
        call("c", "search_code", json!({ "pattern": "fn main" }), &[]),
    ];
    let plan = orchestrator.plan(&calls).unwrap();
    let levels: Vec<Vec<&str>> = plan.levels().iter().map(|level| ids(level)).collect();
    assert_eq!(levels, [vec!["a", "c"], vec!["b"]]);
    assert_eq!(plan.max_parallelism(), 2);

    let report = orchestrator
        .execute(
            calls,
            ExecuteOptions::new().with_max_concurrency(NonZeroUsize::new(5).unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(report.metadata.total_calls, 3);
    assert_eq!(report.metadata.successful, 3);
    assert_eq!(report.metadata.levels_executed, 2);
    assert_eq!(
        report.result("b").unwrap().data.as_ref().unwrap()["echo"]["path"],
        "src/lib.rs"
    );
    let order: Vec<&str> = report.results.iter().map(|result| result.id.as_str()).collect();
    assert_eq!(order, ["a", "b", "c"]);
}

#[tokio::test]
async fn identical_cacheable_calls_in_one_batch_execute_once() {
    let registry = Arc::new(ToolRegistry::new());
    let invocations = counting_tool(&registry, contract("search_code").cacheable(true));
    let orchestrator = Orchestrator::builder(registry).build();

    let report = orchestrator
        .execute(
            vec![
                call("s1", "search_code", json!({ "pattern": "todo" }), &[]),
                call("s2", "search_code", json!({ "pattern": "todo" }), &[]),
            ],
            ExecuteOptions::new(),
        )
        .await
        .unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.metadata.cache_hits, 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cacheable_results_are_served_from_cache_on_repeat() {
    let registry = Arc::new(ToolRegistry::new());
    let invocations = counting_tool(&registry, contract("search").cacheable(true));
    let orchestrator = Orchestrator::builder(registry).build();
    let batch = || vec![call("q", "search", json!({ "query": "breaker", "limit": 5 }), &[])];

    let first = orchestrator.execute(batch(), ExecuteOptions::new()).await.unwrap();
    let second = orchestrator.execute(batch(), ExecuteOptions::new()).await.unwrap();

    assert_eq!(first.metadata.cache_hits, 0);
    assert_eq!(second.metadata.cache_hits, 1);
    assert!(second.result("q").unwrap().cache_hit);
    assert_eq!(second.result("q").unwrap().data, first.result("q").unwrap().data);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let bypassed = orchestrator
        .execute(batch(), ExecuteOptions::new().with_cache(false))
        .await
        .unwrap();
    assert_eq!(bypassed.metadata.cache_hits, 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn best_effort_batches_skip_only_dependents_of_failures() {
    let registry = Arc::new(ToolRegistry::new());
    counting_tool(&registry, contract("ok"));
    registry
        .register_tool(contract("missing"), |_input: Value| async move {
            Err(ToolError::execution("no such file or directory"))
        })
        .unwrap();
    let orchestrator = Orchestrator::builder(registry).build();

    let report = orchestrator
        .execute(
            vec![
                call("x", "missing", json!({}), &[]),
                call("y", "ok", json!({}), &[]),
                call("z", "ok", json!({}), &["x"]),
                call("w", "ok", json!({}), &["z"]),
            ],
            ExecuteOptions::new().with_fail_fast(false),
        )
        .await
        .unwrap();

    assert!(report.result("y").unwrap().success);
    let x = report.result("x").unwrap();
    assert_eq!(x.category(), Some(ErrorCategory::NotFound));
    assert!(x.error.as_ref().unwrap().suggestion.is_some());
    for id in ["z", "w"] {
        assert_eq!(report.result(id).unwrap().category(), Some(ErrorCategory::DependencyFailed));
    }
    assert_eq!(report.metadata.successful, 1);
    assert_eq!(report.metadata.failed, 1);
    assert_eq!(report.metadata.skipped, 2);
}

#[tokio::test]
async fn fail_fast_cancels_remaining_calls() {
    let registry = Arc::new(ToolRegistry::new());
    let invocations = counting_tool(&registry, contract("ok"));
    registry
        .register_tool(contract("broken"), |_input: Value| async move {
            Err(ToolError::categorized(ErrorCategory::Validation, "invalid path"))
        })
        .unwrap();
    let orchestrator = Orchestrator::builder(registry).fail_fast(true).build();

    let report = orchestrator
        .execute(
            vec![
                call("bad", "broken", json!({}), &[]),
                call("next", "ok", json!({}), &[]),
                call("later", "ok", json!({}), &["next"]),
            ],
            ExecuteOptions::new().with_max_concurrency(NonZeroUsize::MIN),
        )
        .await
        .unwrap();

    assert_eq!(report.result("bad").unwrap().category(), Some(ErrorCategory::Validation));
    for id in ["next", "later"] {
        let result = report.result(id).unwrap();
        assert_eq!(result.category(), Some(ErrorCategory::Cancelled));
        assert_eq!(
            result.error.as_ref().unwrap().message,
            "cancelled after an earlier call failed"
        );
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(report.metadata.failed, 1);
    assert_eq!(report.metadata.skipped, 2);
}

#[tokio::test]
async fn cycles_are_rejected_before_anything_runs() {
    let registry = Arc::new(ToolRegistry::new());
    let invocations = counting_tool(&registry, contract("ok"));
    let orchestrator = Orchestrator::builder(registry).build();

    let error = orchestrator
        .execute(
            vec![
                call("a", "ok", json!({}), &["b"]),
                call("b", "ok", json!({}), &["a"]),
                call("c", "ok", json!({}), &[]),
            ],
            ExecuteOptions::new(),
        )
        .await
        .unwrap_err();

    match &error {
        EngineError::CircularDependency { cycle } => assert_eq!(cycle.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.to_string().starts_with("circular dependency: "));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    let error = orchestrator
        .execute(vec![call("u", "does_not_exist", json!({}), &[])], ExecuteOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(error, EngineError::UnknownTool { .. }));
}

#[tokio::test]
async fn open_breaker_fails_fast_until_reset_timeout() {
    let registry = Arc::new(ToolRegistry::new());
    let healthy = Arc::new(AtomicBool::new(false));
    let invocations = Arc::new(AtomicUsize::new(0));
    {
        let healthy = Arc::clone(&healthy);
        let invocations = Arc::clone(&invocations);
        registry
            .register_tool(contract("flaky"), move |_input: Value| {
                let healthy = Arc::clone(&healthy);
                let invocations = Arc::clone(&invocations);
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    if healthy.load(Ordering::SeqCst) {
                        Ok(json!("up"))
                    } else {
                        Err(ToolError::execution("resource not found"))
                    }
                }
            })
            .unwrap();
    }
    let orchestrator = Orchestrator::builder(registry)
        .breaker_config(BreakerConfig::new(
            NonZeroU32::new(2).unwrap(),
            NonZeroU32::MIN,
            Duration::from_millis(50),
        ))
        .build();
    let one = |id: &str| vec![call(id, "flaky", json!({}), &[])];

    for id in ["f1", "f2"] {
        let report = orchestrator.execute(one(id), ExecuteOptions::new()).await.unwrap();
        assert_eq!(report.result(id).unwrap().category(), Some(ErrorCategory::NotFound));
    }
    assert_eq!(orchestrator.breakers().get("flaky").state(), CircuitState::Open);

    let report = orchestrator.execute(one("f3"), ExecuteOptions::new()).await.unwrap();
    assert_eq!(report.result("f3").unwrap().category(), Some(ErrorCategory::BreakerOpen));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(70)).await;
    healthy.store(true, Ordering::SeqCst);
    let report = orchestrator.execute(one("f4"), ExecuteOptions::new()).await.unwrap();
    assert!(report.result("f4").unwrap().success);
    assert_eq!(orchestrator.breakers().get("flaky").state(), CircuitState::Closed);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn denied_calls_are_skipped_and_audited() {
    let registry = Arc::new(ToolRegistry::new());
    let removals = counting_tool(
        &registry,
        contract("rm").with_category("mutation").requires_approval(true),
    );
    counting_tool(&registry, contract("ok"));
    let gate = Arc::new(ApprovalGate::new(ApprovalPolicy::from_lists(
        &[] as &[&str],
        &[],
        &["rm"],
        &[],
    )));
    let orchestrator = Orchestrator::builder(registry)
        .approval_gate(Arc::clone(&gate))
        .build();

    let report = orchestrator
        .execute(
            vec![
                call("del", "rm", json!({ "path": "/tmp/x" }), &[]),
                call("after", "ok", json!({}), &["del"]),
            ],
            ExecuteOptions::new(),
        )
        .await
        .unwrap();

    let del = report.result("del").unwrap();
    assert_eq!(del.approval, ApprovalOutcome::AlwaysDenied);
    assert!(del.is_skipped());
    assert_eq!(
        report.result("after").unwrap().category(),
        Some(ErrorCategory::DependencyFailed)
    );
    assert_eq!(removals.load(Ordering::SeqCst), 0);
    assert_eq!(report.metadata.skipped, 2);
    assert_eq!(gate.stats().always_denied.get("rm"), Some(&1));
}

#[tokio::test]
async fn configured_auto_approval_skips_the_prompt() {
    let registry = Arc::new(ToolRegistry::new());
    let deploys = counting_tool(&registry, contract("deploy").requires_approval(true));
    let config = EngineConfig::from_json_str(
        r#"{ "max_concurrency": 2, "approval": { "auto_approve_tools": ["deploy"] } }"#,
    )
    .unwrap();
    let orchestrator = Orchestrator::from_config(&config, registry).unwrap();

    let report = orchestrator
        .execute(vec![call("d", "deploy", json!({}), &[])], ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(report.result("d").unwrap().approval, ApprovalOutcome::AutoApproved);
    assert_eq!(deploys.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.approval_gate().stats().auto_approved.get("deploy"), Some(&1));
    orchestrator.dispose().await.unwrap();
}

#[tokio::test]
async fn progress_events_survive_backpressure_without_loss() {
    let registry = Arc::new(ToolRegistry::new());
    counting_tool(&registry, contract("ok"));
    let sink = Arc::new(CollectingSink::new());
    let orchestrator = Orchestrator::builder(registry).report_sink(sink.clone()).build();
    let (producer, mut consumer) = event_channel(NonZeroUsize::new(2).unwrap(), CancellationToken::new());
    let observer = producer.clone();

    let reader = tokio::spawn(async move {
        let mut labels = Vec::new();
        while let Some(event) = consumer.next().await {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let done = event.is_done();
            labels.push(event.kind().label());
            if done {
                break;
            }
        }
        labels
    });

    let calls = (0..5).map(|i| call(&format!("c{i}"), "ok", json!({ "i": i }), &[])).collect();
    let report = orchestrator
        .execute(calls, ExecuteOptions::new().with_events(producer))
        .await
        .unwrap();
    let labels = reader.await.unwrap();

    assert_eq!(labels.len(), 12);
    assert_eq!(labels.first(), Some(&"started"));
    assert_eq!(labels.last(), Some(&"done"));
    assert_eq!(labels.iter().filter(|label| **label == "tool-call-complete").count(), 5);
    let state = observer.backpressure();
    assert!(state.pause_count > 0);
    assert_eq!(state.produced, 12);
    assert_eq!(state.consumed, 12);
    assert_eq!(sink.reports(), [report]);
}

#[tokio::test]
async fn caller_cancellation_marks_every_call_cancelled() {
    let registry = Arc::new(ToolRegistry::new());
    let invocations = counting_tool(&registry, contract("ok"));
    let orchestrator = Orchestrator::builder(registry).build();
    let token = CancellationToken::new();
    token.cancel();

    let report = orchestrator
        .execute(
            vec![call("a", "ok", json!({}), &[]), call("b", "ok", json!({}), &["a"])],
            ExecuteOptions::new().with_cancellation(token),
        )
        .await
        .unwrap();

    assert!(report.results.iter().all(|result| result.category() == Some(ErrorCategory::Cancelled)));
    assert_eq!(report.metadata.levels_executed, 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dropped_event_consumer_does_not_stall_the_batch() {
    let registry = Arc::new(ToolRegistry::new());
    let invocations = counting_tool(&registry, contract("ok"));
    let config = EngineConfig::from_json_str(r#"{ "stream": { "high_water_mark": 1 } }"#).unwrap();
    let orchestrator = Orchestrator::from_config(&config, registry).unwrap();
    let (producer, consumer) = orchestrator.event_channel(CancellationToken::new()).unwrap();
    let observer = producer.clone();
    assert_eq!(observer.backpressure().high_water_mark, 1);

    let dropper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(consumer);
    });
    let calls = (0..3).map(|i| call(&format!("c{i}"), "ok", json!({ "i": i }), &[])).collect();
    let report = tokio::time::timeout(
        Duration::from_secs(2),
        orchestrator.execute(calls, ExecuteOptions::new().with_events(producer)),
    )
    .await
    .expect("batch should finish once the consumer is gone")
    .unwrap();
    dropper.await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert!(observer.backpressure().pause_count > 0);
    orchestrator.dispose().await.unwrap();
}

#[tokio::test]
async fn in_flight_calls_never_exceed_max_concurrency() {
    let registry = Arc::new(ToolRegistry::new());
    let active = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));
    {
        let active = Arc::clone(&active);
        let high_water = Arc::clone(&high_water);
        registry
            .register_tool(contract("sleep"), move |input: Value| {
                let active = Arc::clone(&active);
                let high_water = Arc::clone(&high_water);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(input)
                }
            })
            .unwrap();
    }
    let orchestrator = Orchestrator::builder(registry).max_concurrency(NonZeroUsize::new(8).unwrap()).build();

    let mut calls: Vec<ToolCall> = (0..6)
        .map(|i| call(&format!("s{i}"), "sleep", json!({ "i": i }), &[]))
        .collect();
    calls.push(call("join_a", "sleep", json!({}), &["s0", "s1", "s2"]));
    calls.push(call("join_b", "sleep", json!({}), &["s3", "s4", "s5"]));
    calls.push(call("join_c", "sleep", json!({}), &["s5"]));

    let report = orchestrator
        .execute(
            calls,
            ExecuteOptions::new().with_max_concurrency(NonZeroUsize::new(2).unwrap()),
        )
        .await
        .unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.metadata.levels_executed, 2);
    assert!(report.metadata.max_parallelism <= 2);
    assert!(high_water.load(Ordering::SeqCst) <= 2);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}
