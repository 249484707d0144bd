//! End-to-end orchestration tests.
//!
//! Drives the engine with mock agents built from `FnAgent` and atomic counters.
//! Checks: retry budgets, timeout independence, plan modes, skip propagation,
//! swarm patterns, the action façade and hook isolation.

use async_trait::async_trait;
use machinist_agents::{AgentDescriptor, FnAgent};
use machinist_core::{MachinistError, MachinistResult};
use machinist_hooks::{Hook, HookContext, HookVerdict, ALL_HOOKS, SWARM_CONSENSUS, TASK_TIMEOUT};
use machinist_orchestrator::swarm::{StopReason, Weights};
use machinist_orchestrator::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine() -> Engine {
    let mut config = EngineConfig::default();
    config.scheduler.retry = RetryPolicy::immediate();
    config.hooks.trace = false;
    Engine::new(config).unwrap()
}

fn add<F, Fut>(engine: &Engine, id: &str, f: F)
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = MachinistResult<Value>> + Send + 'static,
{
    engine.register_agent(Arc::new(FnAgent::new(
        AgentDescriptor::new(id, id, "test"),
        f,
    )));
}

fn constant(engine: &Engine, id: &str, output: Value) {
    add(engine, id, move |_| {
        let output = output.clone();
        async move { Ok(output) }
    });
}

fn failing(engine: &Engine, id: &str) {
    add(engine, id, |_| async {
        Err(MachinistError::AgentFailure("chatter detected".into()))
    });
}

struct CountingHook {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Hook for CountingHook {
    fn name(&self) -> &str {
        "counting"
    }

    async fn call(&self, _ctx: &HookContext) -> MachinistResult<HookVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HookVerdict::Continue)
    }
}

struct ThrowingHook;

#[async_trait]
impl Hook for ThrowingHook {
    fn name(&self) -> &str {
        "throwing"
    }

    async fn call(&self, _ctx: &HookContext) -> MachinistResult<HookVerdict> {
        Err(MachinistError::Hook("telemetry sink unreachable".into()))
    }
}

struct PanickingHook;

#[async_trait]
impl Hook for PanickingHook {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn call(&self, _ctx: &HookContext) -> MachinistResult<HookVerdict> {
        panic!("hook bug");
    }
}

struct SleepyHook;

#[async_trait]
impl Hook for SleepyHook {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn call(&self, _ctx: &HookContext) -> MachinistResult<HookVerdict> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(HookVerdict::Continue)
    }
}

/// Start and end of one agent invocation, labelled by the input's `op`.
type Spans = Arc<Mutex<Vec<(String, Instant, Instant)>>>;

fn timed(engine: &Engine, id: &str, spans: &Spans) {
    let spans = Arc::clone(spans);
    add(engine, id, move |input| {
        let spans = Arc::clone(&spans);
        async move {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(60)).await;
            let op = input["op"].as_str().unwrap_or_default().to_string();
            spans.lock().push((op.clone(), start, Instant::now()));
            Ok(json!(op))
        }
    });
}

fn stalled(engine: &Engine) {
    add(engine, "stalled", |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(Value::Null)
    });
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_retry_budget_is_k_plus_one() {
    let engine = engine();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    add(&engine, "always_fails", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(MachinistError::AgentFailure("tool broke".into())) }
    });

    let result = engine
        .scheduler()
        .run_task("always_fails", json!({}), TaskOptions::default().with_max_retries(3))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.attempts, 4);
    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.error.unwrap().contains("tool broke"));
}

#[tokio::test]
async fn test_timeout_then_success_uses_two_attempts() {
    let engine = engine();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    add(&engine, "warming_up", move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(json!({"temperature_c": 412}))
        }
    });

    let result = engine
        .scheduler()
        .run_task(
            "warming_up",
            json!({}),
            TaskOptions::default().with_timeout_ms(50).with_max_retries(2),
        )
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Succeeded);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.output.unwrap()["temperature_c"], 412);
}

#[tokio::test]
async fn test_timeout_hook_fires_once_per_task() {
    let engine = engine();
    let fired = Arc::new(AtomicU32::new(0));
    engine.register_hook(
        TASK_TIMEOUT,
        Arc::new(CountingHook {
            calls: Arc::clone(&fired),
        }),
    );
    add(&engine, "stalled", |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(Value::Null)
    });

    let result = engine
        .scheduler()
        .run_task(
            "stalled",
            json!({}),
            TaskOptions::default().with_timeout_ms(10).with_max_retries(2),
        )
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::TimedOut);
    assert_eq!(result.attempts, 3);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_broken_timeout_hooks_leave_outcome_unchanged() {
    let quiet = engine();
    stalled(&quiet);

    let mut config = EngineConfig::default();
    config.scheduler.retry = RetryPolicy::immediate();
    config.hooks.trace = false;
    config.hooks.timeout_ms = 20;
    let noisy = Engine::new(config).unwrap();
    stalled(&noisy);
    let fired = Arc::new(AtomicU32::new(0));
    noisy.register_hook(TASK_TIMEOUT, Arc::new(ThrowingHook));
    noisy.register_hook(TASK_TIMEOUT, Arc::new(PanickingHook));
    noisy.register_hook(TASK_TIMEOUT, Arc::new(SleepyHook));
    noisy.register_hook(
        TASK_TIMEOUT,
        Arc::new(CountingHook {
            calls: Arc::clone(&fired),
        }),
    );
    assert_eq!(noisy.hooks().hook_count(TASK_TIMEOUT), 4);

    let options = || TaskOptions::default().with_timeout_ms(10).with_max_retries(2);
    let expected = quiet
        .scheduler()
        .run_task("stalled", json!({}), options())
        .await
        .unwrap();
    let started = Instant::now();
    let actual = noisy
        .scheduler()
        .run_task("stalled", json!({}), options())
        .await
        .unwrap();

    assert_eq!(actual.status, TaskStatus::TimedOut);
    assert_eq!(actual.status, expected.status);
    assert_eq!(actual.attempts, 3);
    assert_eq!(actual.attempts, expected.attempts);
    assert_eq!(actual.error, expected.error);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    // The sleeping hook is cut off at the bus deadline.
    assert!(started.elapsed() < Duration::from_millis(400));

    let report = noisy
        .hooks()
        .execute(
            TASK_TIMEOUT,
            HookContext::new(TASK_TIMEOUT, "run_task", "task", "t-1", json!({})),
        )
        .await;
    assert_eq!(report.invoked, 4);
    assert_eq!(report.failures, 3);
    assert!(!report.is_vetoed());
}

#[tokio::test]
async fn test_mixed_timeout_and_failure_is_failed() {
    let engine = engine();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    add(&engine, "erratic", move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(Value::Null)
            } else {
                Err(MachinistError::AgentFailure("sensor offline".into()))
            }
        }
    });

    let result = engine
        .scheduler()
        .run_task(
            "erratic",
            json!({}),
            TaskOptions::default().with_timeout_ms(20).with_max_retries(1),
        )
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("Agent failure: sensor offline"));
}

#[tokio::test]
async fn test_queue_stats_move_once_per_task() {
    let engine = engine();
    constant(&engine, "ok", json!(1));
    failing(&engine, "bad");

    let scheduler = engine.scheduler();
    scheduler.run_task("ok", json!({}), TaskOptions::default()).await.unwrap();
    scheduler
        .run_task("bad", json!({}), TaskOptions::default().with_max_retries(2))
        .await
        .unwrap();

    let stats = scheduler.queue_stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.running, 0);
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_plan_modes_agree_on_independent_tasks() {
    let engine = engine();
    add(&engine, "double", |input| async move {
        let n = input["n"].as_i64().unwrap_or(0);
        Ok(json!(n * 2))
    });

    let specs = || {
        vec![
            TaskSpec::new("double", json!({"n": 1})).with_id("a"),
            TaskSpec::new("double", json!({"n": 2})).with_id("b"),
            TaskSpec::new("double", json!({"n": 3})).with_id("c"),
        ]
    };
    let scheduler = engine.scheduler();
    let mut outputs = Vec::new();
    for mode in [PlanMode::Sequential, PlanMode::Parallel, PlanMode::Pipeline] {
        let plan = scheduler.create_plan("modes", mode, specs()).await.unwrap();
        let done = scheduler.execute_plan(plan.id).await.unwrap();
        assert_eq!(done.status, PlanStatus::Completed, "mode {mode}");
        let per_task: Vec<Value> = ["a", "b", "c"]
            .iter()
            .map(|id| done.results[*id].output.clone().unwrap())
            .collect();
        outputs.push(per_task);
    }
    assert_eq!(outputs[0], vec![json!(2), json!(4), json!(6)]);
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
}

#[tokio::test]
async fn test_sequential_fails_fast_but_pipeline_is_partial() {
    let engine = engine();
    constant(&engine, "ok", json!({"ok": true}));
    let broken_calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&broken_calls);
    add(&engine, "broken", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(MachinistError::AgentFailure("fixture misaligned".into())) }
    });
    let tail_calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&tail_calls);
    add(&engine, "tail", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(json!("tail")) }
    });

    let scheduler = engine.scheduler();
    let no_retry = TaskOptions::default().with_max_retries(0);

    let sequential = scheduler
        .create_plan(
            "seq",
            PlanMode::Sequential,
            vec![
                TaskSpec::new("ok", json!({})).with_id("t1"),
                TaskSpec::new("broken", json!({})).with_id("t2").with_options(no_retry.clone()),
                TaskSpec::new("tail", json!({})).with_id("t3"),
            ],
        )
        .await
        .unwrap();
    let done = scheduler.execute_plan(sequential.id).await.unwrap();
    assert_eq!(done.status, PlanStatus::Failed);
    assert!(done.aggregated_output.is_none());
    assert_eq!(done.results["t3"].status, TaskStatus::Skipped);
    assert_eq!(tail_calls.load(Ordering::SeqCst), 0);

    // Two independent branches; only one fails.
    let pipeline = scheduler
        .create_plan(
            "pipe",
            PlanMode::Pipeline,
            vec![
                TaskSpec::new("ok", json!({})).with_id("left"),
                TaskSpec::new("broken", json!({})).with_id("right").with_options(no_retry),
                TaskSpec::new("tail", json!({}))
                    .with_id("left_tail")
                    .with_dependencies(vec!["left"]),
                TaskSpec::new("tail", json!({}))
                    .with_id("right_tail")
                    .with_dependencies(vec!["right"]),
            ],
        )
        .await
        .unwrap();
    let done = scheduler.execute_plan(pipeline.id).await.unwrap();
    assert_eq!(done.status, PlanStatus::Partial);
    assert_eq!(done.results["left_tail"].status, TaskStatus::Succeeded);
    assert_eq!(done.results["right_tail"].status, TaskStatus::Skipped);
    assert_eq!(done.aggregated_output, Some(json!({"left_tail": "tail"})));
    assert_eq!(tail_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cyclic_plan_rejected() {
    let engine = engine();
    constant(&engine, "ok", json!(1));
    let err = engine
        .scheduler()
        .create_plan(
            "loop",
            PlanMode::Pipeline,
            vec![
                TaskSpec::new("ok", json!({})).with_id("a").with_dependencies(vec!["b"]),
                TaskSpec::new("ok", json!({})).with_id("b").with_dependencies(vec!["a"]),
            ],
        )
        .await
        .unwrap_err();
    let MachinistError::Validation(problems) = err else {
        panic!("expected validation error");
    };
    assert!(problems[0].contains("cycle"));
}

#[tokio::test]
async fn test_sequential_plan_runs_in_list_order_without_overlap() {
    let engine = engine();
    let spans: Spans = Arc::default();
    timed(&engine, "op", &spans);

    let scheduler = engine.scheduler();
    let plan = scheduler
        .create_plan(
            "one at a time",
            PlanMode::Sequential,
            vec![
                TaskSpec::new("op", json!({"op": "face"})),
                TaskSpec::new("op", json!({"op": "drill"})),
                TaskSpec::new("op", json!({"op": "tap"})),
            ],
        )
        .await
        .unwrap();
    let done = scheduler.execute_plan(plan.id).await.unwrap();
    assert_eq!(done.status, PlanStatus::Completed);
    assert_eq!(done.aggregated_output, Some(json!("tap")));

    let mut spans = spans.lock().clone();
    spans.sort_by_key(|(_, start, _)| *start);
    let order: Vec<&str> = spans.iter().map(|(op, _, _)| op.as_str()).collect();
    assert_eq!(order, ["face", "drill", "tap"]);
    for pair in spans.windows(2) {
        assert!(pair[0].2 <= pair[1].1, "'{}' overlapped '{}'", pair[0].0, pair[1].0);
    }
}

#[tokio::test]
async fn test_parallel_plan_ignores_dependencies_and_overlaps() {
    let engine = engine();
    let spans: Spans = Arc::default();
    timed(&engine, "op", &spans);

    let scheduler = engine.scheduler();
    let plan = scheduler
        .create_plan(
            "all at once",
            PlanMode::Parallel,
            vec![
                TaskSpec::new("op", json!({"op": "face"})).with_id("face"),
                TaskSpec::new("op", json!({"op": "drill"}))
                    .with_id("drill")
                    .with_dependencies(vec!["face"]),
                TaskSpec::new("op", json!({"op": "tap"}))
                    .with_id("tap")
                    .with_dependencies(vec!["drill"]),
            ],
        )
        .await
        .unwrap();
    let done = scheduler.execute_plan(plan.id).await.unwrap();
    assert_eq!(done.status, PlanStatus::Completed);
    // No dependency results are passed along in parallel mode.
    assert_eq!(done.results["tap"].output, Some(json!("tap")));

    let spans = spans.lock().clone();
    assert_eq!(spans.len(), 3);
    let last_start = spans.iter().map(|(_, start, _)| *start).max().unwrap();
    let first_end = spans.iter().map(|(_, _, end)| *end).min().unwrap();
    assert!(last_start < first_end, "every task should start before any finishes");
}

// ---------------------------------------------------------------------------
// Swarms
// ---------------------------------------------------------------------------

fn graders(engine: &Engine) -> Vec<&'static str> {
    for id in ["a1", "a2", "a3"] {
        constant(engine, id, json!({"grade": "A", "source": id}));
    }
    for id in ["b1", "b2"] {
        constant(engine, id, json!({"grade": "B", "source": id}));
    }
    vec!["b1", "a1", "a2", "b2", "a3"]
}

#[tokio::test]
async fn test_consensus_three_against_two() {
    let engine = engine();
    let agents = graders(&engine);
    let request = SwarmRequest::new(SwarmPattern::Consensus, agents)
        .with_options(SwarmOptions {
            consensus_field: Some("grade".into()),
            ..SwarmOptions::default()
        });
    let result = engine.swarms().execute(request).await.unwrap();

    let consensus = result.consensus.unwrap();
    assert!((consensus.actual_agreement - 0.6).abs() < 1e-9);
    assert!(consensus.reached);
    assert_eq!(consensus.value, json!("A"));
    assert_eq!(consensus.agreeing, vec!["a1", "a2", "a3"]);
    assert_eq!(consensus.groups, 2);
    assert_eq!(result.aggregated_output.unwrap()["source"], "a1");
    assert_eq!(result.status, SwarmStatus::Completed);
}

#[tokio::test]
async fn test_consensus_below_threshold_still_completes() {
    let engine = engine();
    let agents = graders(&engine);
    let request = SwarmRequest::new(SwarmPattern::Consensus, agents).with_options(SwarmOptions {
        consensus_field: Some("grade".into()),
        consensus_threshold: Some(0.7),
        ..SwarmOptions::default()
    });
    let result = engine.swarms().execute(request).await.unwrap();

    assert_eq!(result.status, SwarmStatus::Completed);
    let consensus = result.consensus.unwrap();
    assert!(!consensus.reached);
    assert!((consensus.actual_agreement - 0.6).abs() < 1e-9);
    assert_eq!(consensus.threshold, 0.7);
    assert_eq!(consensus.value, json!("A"));
    assert!(consensus.vetoed_by.is_none());
}

#[tokio::test]
async fn test_consensus_agreement_equal_to_threshold_is_reached() {
    let engine = engine();
    let agents = graders(&engine);
    let request = SwarmRequest::new(SwarmPattern::Consensus, agents).with_options(SwarmOptions {
        consensus_field: Some("grade".into()),
        consensus_threshold: Some(0.6),
        ..SwarmOptions::default()
    });
    let result = engine.swarms().execute(request).await.unwrap();

    let consensus = result.consensus.unwrap();
    assert!(consensus.reached);
    assert_eq!(consensus.threshold, 0.6);
    // The aggregate is the first agreeing agent's whole output.
    assert_eq!(
        result.aggregated_output,
        Some(json!({"grade": "A", "source": "a1"}))
    );
}

#[tokio::test]
async fn test_consensus_veto_forces_not_reached() {
    let mut config = EngineConfig::default();
    config.hooks.trace = false;
    config.hooks.consensus_floor = Some(0.9);
    let engine = Engine::new(config).unwrap();
    constant(&engine, "x", json!(1));
    constant(&engine, "y", json!(1));
    constant(&engine, "z", json!(2));

    let result = engine
        .swarms()
        .execute(SwarmRequest::new(SwarmPattern::Consensus, vec!["x", "y", "z"]))
        .await
        .unwrap();
    let consensus = result.consensus.unwrap();
    assert!(!consensus.reached);
    assert_eq!(consensus.vetoed_by.as_deref(), Some("consensus_floor"));
}

#[tokio::test]
async fn test_consensus_without_successes_fails() {
    let engine = engine();
    failing(&engine, "f1");
    failing(&engine, "f2");
    let mut request = SwarmRequest::new(SwarmPattern::Consensus, vec!["f1", "f2"]);
    request.options.max_retries = Some(0);
    let result = engine.swarms().execute(request).await.unwrap();
    assert_eq!(result.status, SwarmStatus::Failed);
    assert!(result.error.unwrap().starts_with("Coordination failure"));
    assert_eq!(result.fail_count, 2);
}

#[tokio::test]
async fn test_competition_picks_highest_score() {
    let engine = engine();
    constant(&engine, "roughing", json!({"score": 0.9}));
    constant(&engine, "finishing", json!({"score": 0.95}));
    constant(&engine, "trochoidal", json!({"score": 0.7}));

    let result = engine
        .swarms()
        .execute(SwarmRequest::new(
            SwarmPattern::Competition,
            vec!["roughing", "finishing", "trochoidal"],
        ))
        .await
        .unwrap();
    let competition = result.competition.unwrap();
    assert_eq!(competition.winner, "finishing");
    assert_eq!(competition.score, 0.95);
    assert_eq!(competition.runner_up.as_deref(), Some("roughing"));
    assert!((competition.margin.unwrap() - 0.05).abs() < 1e-9);
    assert_eq!(result.aggregated_output, Some(json!({"score": 0.95})));
}

#[tokio::test]
async fn test_competition_without_scores_fails() {
    let engine = engine();
    constant(&engine, "plain", json!({"value": 3}));
    let result = engine
        .swarms()
        .execute(SwarmRequest::new(SwarmPattern::Competition, vec!["plain"]))
        .await
        .unwrap();
    assert_eq!(result.status, SwarmStatus::Failed);
    assert!(result.competition.is_none());
}

#[tokio::test]
async fn test_collaboration_converges_after_round_two() {
    let engine = engine();
    let calls = Arc::new(AtomicU32::new(0));
    for id in ["drafter", "reviewer", "editor"] {
        let counter = Arc::clone(&calls);
        add(&engine, id, move |input| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                // the artifact settles as soon as someone sees it
                match input.get("artifact") {
                    Some(artifact) => Ok(artifact.clone()),
                    None => Ok(json!({"toolpath": "adaptive", "stepover": 0.4})),
                }
            }
        });
    }

    let result = engine
        .swarms()
        .execute(
            SwarmRequest::new(SwarmPattern::Collaboration, vec!["drafter", "reviewer", "editor"])
                .with_input(json!({"part": "bracket"}))
                .with_options(SwarmOptions {
                    max_rounds: Some(5),
                    ..SwarmOptions::default()
                }),
        )
        .await
        .unwrap();

    let collaboration = result.collaboration.unwrap();
    assert!(collaboration.converged);
    assert_eq!(collaboration.rounds, 2);
    assert_eq!(collaboration.stop_reason, StopReason::Converged);
    assert_eq!(collaboration.history[1].agent_id, "reviewer");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.aggregated_output.unwrap()["toolpath"], "adaptive");
}

#[tokio::test]
async fn test_collaboration_round_limit() {
    let engine = engine();
    add(&engine, "counter", |input| async move {
        let round = input.get("round").and_then(Value::as_u64).unwrap_or(1);
        Ok(json!({"revision": round}))
    });
    let result = engine
        .swarms()
        .execute(SwarmRequest::new(SwarmPattern::Collaboration, vec!["counter", "counter"]))
        .await
        .unwrap();
    let collaboration = result.collaboration.unwrap();
    assert!(!collaboration.converged);
    assert_eq!(collaboration.rounds, 2);
    assert_eq!(collaboration.stop_reason, StopReason::RoundLimit);
    assert_eq!(result.aggregated_output, Some(json!({"revision": 2})));
}

#[tokio::test]
async fn test_swarm_pipeline_merges_outputs() {
    let engine = engine();
    add(&engine, "speed", |input| async move {
        let diameter = input["diameter_mm"].as_f64().unwrap_or(0.0);
        Ok(json!({"rpm": (1000.0 * 100.0 / (std::f64::consts::PI * diameter)).round()}))
    });
    add(&engine, "feed", |input| async move {
        // two flutes at 0.1 mm per tooth
        let rpm = input["rpm"].as_f64().unwrap_or(0.0) as i64;
        Ok(json!({"feed_mm_min": rpm / 5}))
    });

    let result = engine
        .swarms()
        .execute(
            SwarmRequest::new(SwarmPattern::Pipeline, vec!["speed", "feed"])
                .with_input(json!({"diameter_mm": 10.0})),
        )
        .await
        .unwrap();
    assert_eq!(result.status, SwarmStatus::Completed);
    assert_eq!(result.aggregated_output, Some(json!({"feed_mm_min": 636})));
}

#[tokio::test]
async fn test_swarm_pipeline_halts_on_failure() {
    let engine = engine();
    failing(&engine, "first");
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    add(&engine, "second", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(json!(1)) }
    });
    let mut request = SwarmRequest::new(SwarmPattern::Pipeline, vec!["first", "second"]);
    request.options.max_retries = Some(0);
    let result = engine.swarms().execute(request).await.unwrap();
    assert_eq!(result.status, SwarmStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.agents.len(), 1);
}

#[tokio::test]
async fn test_map_reduce_sums_partitions() {
    let engine = engine();
    for id in ["m1", "m2"] {
        add(&engine, id, |input| async move {
            let total: i64 = input
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            Ok(json!(total))
        });
    }
    let result = engine
        .swarms()
        .execute(
            SwarmRequest::new(SwarmPattern::MapReduce, vec!["m1", "m2"])
                .with_input(json!([1, 2, 3, 4, 5])),
        )
        .await
        .unwrap();
    assert_eq!(result.aggregated_output, Some(json!(15)));
    assert_eq!(result.agents[0].output, Some(json!(6)));
}

#[tokio::test]
async fn test_map_reduce_custom_reducer() {
    let engine = engine();
    constant(&engine, "m", json!(3));
    let options = SwarmOptions {
        custom_reducer: Some(Arc::new(|values: &[Value]| Ok(json!(values.len())))),
        ..SwarmOptions::default()
    };
    let result = engine
        .swarms()
        .execute(
            SwarmRequest::new(SwarmPattern::MapReduce, vec!["m", "m", "m"])
                .with_input(json!({"batch": 1}))
                .with_options(options),
        )
        .await
        .unwrap();
    assert_eq!(result.aggregated_output, Some(json!(3)));
}

#[tokio::test]
async fn test_hierarchical_folds_tiers() {
    let engine = engine();
    add(&engine, "leaf", |input| async move {
        Ok(json!(input.get("base").and_then(Value::as_i64).unwrap_or(0)))
    });
    add(&engine, "root", |input| async move {
        Ok(json!({"seen": input["previous_tier"], "tier": input["tier"]}))
    });

    let options = SwarmOptions {
        tiers: Some(vec![
            vec!["leaf".into(), "leaf".into()],
            vec!["root".into()],
        ]),
        ..SwarmOptions::default()
    };
    let result = engine
        .swarms()
        .execute(
            SwarmRequest::new(SwarmPattern::Hierarchical, Vec::new())
                .with_input(json!({"base": 4}))
                .with_options(options),
        )
        .await
        .unwrap();
    assert_eq!(result.status, SwarmStatus::Completed);
    assert_eq!(result.aggregated_output, Some(json!({"seen": 8, "tier": 1})));
    assert_eq!(result.agents.len(), 3);
}

#[tokio::test]
async fn test_ensemble_weighted_mean() {
    let engine = engine();
    constant(&engine, "model_a", json!({"ra_um": 0.8}));
    constant(&engine, "model_b", json!({"ra_um": 1.6}));
    let options = SwarmOptions {
        consensus_field: Some("ra_um".into()),
        weights: Some(Weights::ByPosition(vec![3.0, 1.0])),
        ..SwarmOptions::default()
    };
    let result = engine
        .swarms()
        .execute(
            SwarmRequest::new(SwarmPattern::Ensemble, vec!["model_a", "model_b"]).with_options(options),
        )
        .await
        .unwrap();
    let mean = result.aggregated_output.unwrap().as_f64().unwrap();
    assert!((mean - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_parallel_swarm_partial() {
    let engine = engine();
    constant(&engine, "ok", json!("ok"));
    failing(&engine, "bad");
    let mut request = SwarmRequest::new(SwarmPattern::Parallel, vec!["ok", "bad"]);
    request.options.max_retries = Some(0);
    let result = engine.swarms().execute(request).await.unwrap();
    assert_eq!(result.status, SwarmStatus::Partial);
    assert_eq!(result.aggregated_output, Some(json!(["ok", null])));
    assert_eq!(result.success_count, 1);
    assert_eq!(result.fail_count, 1);
}

#[tokio::test]
async fn test_swarm_validation_aggregates() {
    let engine = engine();
    let err = engine
        .swarms()
        .execute(SwarmRequest::new(SwarmPattern::Parallel, vec!["ghost", "phantom"]))
        .await
        .unwrap_err();
    let MachinistError::Validation(problems) = err else {
        panic!("expected validation error");
    };
    assert_eq!(problems.len(), 2);

    let err = engine
        .swarms()
        .execute(SwarmRequest::new(SwarmPattern::Parallel, Vec::new()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("at least one agent"));
}

// ---------------------------------------------------------------------------
// Façade and hooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_registry_miss_through_dispatch() {
    let engine = engine();
    constant(&engine, "thermal_model", json!(1));
    constant(&engine, "thermal_expansion", json!(2));
    constant(&engine, "chip_load", json!(3));

    let reply = engine
        .dispatch("agent_execute", json!({"agentId": "thermal", "input": {}}))
        .await;
    assert_eq!(reply["action"], "agent_execute");
    assert_eq!(reply["kind"], "unknown_agent");
    assert_eq!(reply["error"], "Unknown agent: thermal");
    let suggestions: Vec<&str> = reply["suggestions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(suggestions[..2], ["thermal_expansion", "thermal_model"]);
}

#[tokio::test]
async fn test_failing_hooks_do_not_change_results() {
    let quiet = engine();
    let noisy = engine();
    for engine in [&quiet, &noisy] {
        for id in ["a", "b", "c"] {
            constant(engine, id, json!({"verdict": "ok"}));
        }
    }
    noisy.register_hook(ALL_HOOKS, Arc::new(ThrowingHook));
    noisy.register_hook(SWARM_CONSENSUS, Arc::new(PanickingHook));

    let request = || SwarmRequest::new(SwarmPattern::Consensus, vec!["a", "b", "c"]);
    let expected = quiet.swarms().execute(request()).await.unwrap();
    let actual = noisy.swarms().execute(request()).await.unwrap();

    assert_eq!(actual.status, expected.status);
    assert_eq!(actual.aggregated_output, expected.aggregated_output);
    let (a, e) = (actual.consensus.unwrap(), expected.consensus.unwrap());
    assert_eq!(a.reached, e.reached);
    assert_eq!(a.actual_agreement, e.actual_agreement);
    assert!(a.vetoed_by.is_none());
}

#[tokio::test]
async fn test_sessions_report_plans_and_swarms() {
    let engine = engine();
    constant(&engine, "ok", json!(1));
    engine
        .dispatch("plan_create", json!({"name": "nightly", "tasks": [{"agentId": "ok"}]}))
        .await;
    engine
        .dispatch("swarm_parallel", json!({"agents": ["ok"]}))
        .await;

    let sessions = engine.dispatch("session_list", json!({})).await;
    assert_eq!(sessions["plans"][0]["name"], "nightly");
    assert_eq!(sessions["swarms"].as_array().unwrap().len(), 1);
    assert_eq!(sessions["available_agents"], json!(["ok"]));
    assert_eq!(sessions["agent_metrics"]["ok"]["invocations"], 1);
}
