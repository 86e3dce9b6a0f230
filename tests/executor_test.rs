//! Executor behavior tests
//!
//! Drives parsed trees through `DslExecutor` with closure task executors
//! and checks ordering, failure, retry and cancellation semantics.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use orca::dsl::{Catalog, DslNode, DslParser, DslValidator, Severity};
use orca::limits::ResourceLimits;
use orca::runtime::{
    DslExecutionContext, DslExecutor, ExecutionState, ExecutionStatus, ExecutorConfig,
    FnTaskExecutor,
};

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        task_retry_delay: Duration::from_millis(1),
        default_poll_interval: Duration::from_millis(5),
        default_wait_timeout: Duration::from_millis(100),
        default_max_iterations: 100,
    }
}

fn tree(steps: Value) -> DslNode {
    DslParser::new()
        .parse(steps.as_array().expect("step list"))
        .into_result()
        .expect("valid steps")
}

fn context() -> Arc<DslExecutionContext> {
    Arc::new(DslExecutionContext::new("wf", "exec", Map::new()))
}

fn executor(exec: FnTaskExecutor) -> DslExecutor {
    DslExecutor::new(Arc::new(exec)).with_config(fast_config())
}

/// Executor that logs every task name it is asked to run
fn logging_executor(log: Arc<Mutex<Vec<String>>>) -> DslExecutor {
    executor(FnTaskExecutor::new(move |task, _, _| {
        log.lock().push(task.clone());
        async move { Ok(json!(task)) }
    }))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_simple_success() {
    let exec = executor(FnTaskExecutor::new(|task, _, _| async move {
        assert_eq!(task, "t1");
        Ok(json!({"ok": true}))
    }));
    let root = tree(json!([{"task": "t1", "tools": [], "parameters": {}}]));
    let ctx = context();

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(result.success);
    assert_eq!(Value::Object(result.result), json!({"t1": {"ok": true}}));
    assert_eq!(result.metadata.completed_nodes, 1);
}

#[tokio::test]
async fn test_variable_substitution() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let c = Arc::clone(&calls);
    let exec = executor(FnTaskExecutor::new(move |task, _, params| {
        c.lock().push((task.clone(), Value::Object(params)));
        async move {
            Ok(match task.as_str() {
                "a" => json!(42),
                _ => json!("done"),
            })
        }
    }));
    let root = tree(json!([{"task": "a"}, {"task": "b", "parameters": {"x": "${result.a}"}}]));

    exec.execute_workflow(&root, &context(), None).await.unwrap();

    let calls = calls.lock();
    assert_eq!(calls[1], ("b".to_string(), json!({"x": 42})));
}

#[tokio::test]
async fn test_variables_seed_parameters() {
    let seen = Arc::new(Mutex::new(Value::Null));
    let s = Arc::clone(&seen);
    let exec = executor(FnTaskExecutor::new(move |_, _, params| {
        *s.lock() = Value::Object(params);
        async { Ok(json!(null)) }
    }));
    let root = tree(json!([{"task": "search", "parameters": {"q": "about ${topic}"}}]));
    let mut vars = Map::new();
    vars.insert("topic".into(), json!("rust"));
    let ctx = Arc::new(DslExecutionContext::new("wf", "exec", vars));

    exec.execute_workflow(&root, &ctx, None).await.unwrap();
    assert_eq!(*seen.lock(), json!({"q": "about rust"}));
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_sequence_runs_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let exec = logging_executor(Arc::clone(&log));
    let steps: Vec<Value> = (0..6).map(|i| json!({"task": format!("step{}", i)})).collect();
    let root = tree(Value::Array(steps));

    let result = exec.execute_workflow(&root, &context(), None).await.unwrap();

    let expected: Vec<String> = (0..6).map(|i| format!("step{}", i)).collect();
    assert_eq!(*log.lock(), expected);
    assert_eq!(result.output, json!(expected));
}

#[tokio::test]
async fn test_parallel_results_keep_child_order() {
    let exec = executor(FnTaskExecutor::new(|task, _, _| async move {
        let delay = match task.as_str() {
            "a" => 60,
            "b" => 30,
            _ => 1,
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!(format!("result_{}", task)))
    }));
    let root = tree(json!([{"parallel": [{"task": "a"}, {"task": "b"}, {"task": "c"}]}]));

    let result = exec.execute_workflow(&root, &context(), None).await.unwrap();
    assert_eq!(result.output, json!(["result_a", "result_b", "result_c"]));
}

#[tokio::test]
async fn test_parallel_max_concurrency_bounds_in_flight() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
    let exec = executor(FnTaskExecutor::new(move |_, _, _| {
        let (f, p) = (Arc::clone(&f), Arc::clone(&p));
        async move {
            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            f.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(null))
        }
    }));
    let children: Vec<Value> = (0..6).map(|i| json!({"task": format!("t{}", i)})).collect();
    let root = tree(json!([{"parallel": children, "max_concurrency": 2}]));

    exec.execute_workflow(&root, &context(), None).await.unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Failure semantics
// ============================================================================

fn failing_with_slow_sibling(finished: Arc<AtomicBool>) -> DslExecutor {
    executor(FnTaskExecutor::new(move |task, _, _| {
        let finished = Arc::clone(&finished);
        async move {
            match task.as_str() {
                "boom" => anyhow::bail!("exploded"),
                _ => {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(json!("slow done"))
                }
            }
        }
    }))
}

#[tokio::test]
async fn test_fail_fast_cancels_siblings_and_propagates() {
    let finished = Arc::new(AtomicBool::new(false));
    let exec = failing_with_slow_sibling(Arc::clone(&finished));
    let root = tree(json!([{"parallel": [{"task": "slow"}, {"task": "boom"}]}]));
    let ctx = context();

    let err = exec.execute_workflow(&root, &ctx, None).await.unwrap_err();

    assert_eq!(err.error_code(), "ORCA-020");
    assert!(!finished.load(Ordering::SeqCst), "sibling must not run to completion");
    assert_eq!(ctx.node_state("slow"), Some(ExecutionState::Cancelled));
    assert_eq!(ctx.result("slow").unwrap()["node_id"], "slow");
    assert_eq!(ctx.node_state("boom"), Some(ExecutionState::Failed));
    assert_eq!(ctx.node_state("parallel_1"), Some(ExecutionState::Failed));
}

#[tokio::test]
async fn test_without_fail_fast_errors_are_captured() {
    let finished = Arc::new(AtomicBool::new(false));
    let exec = failing_with_slow_sibling(Arc::clone(&finished));
    let root = tree(json!([{
        "parallel": [{"task": "slow"}, {"task": "boom"}],
        "fail_fast": false
    }]));
    let ctx = context();

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    assert!(finished.load(Ordering::SeqCst));
    let output = result.output.as_array().unwrap();
    assert_eq!(output[0], "slow done");
    assert_eq!(output[1]["node_id"], "boom");
    assert_eq!(output[1]["error_code"], "ORCA-020");
    assert_eq!(result.metadata.failed_nodes, 1);
}

#[tokio::test]
async fn test_first_completion_wins_when_not_waiting_for_all() {
    let finished = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&finished);
    let exec = executor(FnTaskExecutor::new(move |task, _, _| {
        let f = Arc::clone(&f);
        async move {
            if task == "slow" {
                tokio::time::sleep(Duration::from_millis(200)).await;
                f.store(true, Ordering::SeqCst);
            }
            Ok(json!(task))
        }
    }));
    let root = tree(json!([{
        "parallel": [{"task": "slow"}, {"task": "fast"}],
        "wait_for_all": false
    }]));
    let ctx = context();

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    assert_eq!(result.output, json!([null, "fast"]));
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(ctx.node_state("slow"), Some(ExecutionState::Cancelled));
    assert_eq!(ctx.result("slow").unwrap()["error_code"], "ORCA-032");
}

/// `ok*` tasks succeed after 30ms, `boom` fails at once, `late_boom` fails after 20ms
fn first_success_executor(started: Arc<Mutex<Vec<String>>>) -> DslExecutor {
    executor(FnTaskExecutor::new(move |task, _, _| {
        started.lock().push(task.clone());
        async move {
            match task.as_str() {
                "boom" => anyhow::bail!("fast failure"),
                "late_boom" => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    anyhow::bail!("late failure")
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(json!(task))
                }
            }
        }
    }))
}

#[tokio::test]
async fn test_first_success_outlasts_an_early_failure() {
    for fail_fast in [true, false] {
        let exec = first_success_executor(Arc::new(Mutex::new(Vec::new())));
        let root = tree(json!([{
            "parallel": [{"task": "ok"}, {"task": "boom"}],
            "wait_for_all": false,
            "fail_fast": fail_fast
        }]));
        let ctx = context();

        let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

        let output = result.output.as_array().unwrap();
        assert_eq!(output[0], "ok", "fail_fast={}", fail_fast);
        assert_eq!(output[1]["node_id"], "boom");
        assert_eq!(output[1]["error_code"], "ORCA-020");
        assert_eq!(ctx.node_state("boom"), Some(ExecutionState::Failed));
        assert_eq!(ctx.node_state("parallel_1"), Some(ExecutionState::Completed));
    }
}

#[tokio::test]
async fn test_first_success_all_failed_with_fail_fast_propagates() {
    let exec = first_success_executor(Arc::new(Mutex::new(Vec::new())));
    let root = tree(json!([{
        "parallel": [{"task": "late_boom"}, {"task": "boom"}],
        "wait_for_all": false
    }]));
    let ctx = context();

    let err = exec.execute_workflow(&root, &ctx, None).await.unwrap_err();

    assert_eq!(err.error_code(), "ORCA-020");
    assert!(err.to_string().contains("fast failure"), "first error wins: {}", err);
    assert_eq!(ctx.node_state("late_boom"), Some(ExecutionState::Failed));
    assert_eq!(ctx.node_state("parallel_1"), Some(ExecutionState::Failed));
}

#[tokio::test]
async fn test_first_success_all_failed_without_fail_fast_captures() {
    let exec = first_success_executor(Arc::new(Mutex::new(Vec::new())));
    let root = tree(json!([{
        "parallel": [{"task": "late_boom"}, {"task": "boom"}],
        "wait_for_all": false,
        "fail_fast": false
    }]));

    let result = exec.execute_workflow(&root, &context(), None).await.unwrap();

    let output = result.output.as_array().unwrap();
    assert_eq!(output[0]["node_id"], "late_boom");
    assert_eq!(output[1]["node_id"], "boom");
    assert_eq!(result.metadata.failed_nodes, 2);
}

#[tokio::test]
async fn test_first_success_respects_max_concurrency() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let exec = first_success_executor(Arc::clone(&started));
    let root = tree(json!([{
        "parallel": [{"task": "boom"}, {"task": "ok"}, {"task": "ok_later"}],
        "wait_for_all": false,
        "max_concurrency": 1
    }]));
    let ctx = context();

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    let output = result.output.as_array().unwrap();
    assert_eq!(output[0]["node_id"], "boom");
    assert_eq!(output[1], "ok");
    assert_eq!(output[2], Value::Null);
    assert_eq!(*started.lock(), vec!["boom".to_string(), "ok".to_string()]);
    assert_eq!(ctx.node_state("ok_later"), None, "never dispatched");
    assert!(ctx.result("ok_later").is_none());
}

#[tokio::test]
async fn test_wait_with_unrepresentable_timeout_still_polls() {
    let exec = executor(FnTaskExecutor::new(|_, _, _| async { Ok(json!(null)) }));
    let root = tree(json!([{"wait": {"condition": "ready", "timeout": 1e19, "poll_interval": 0.005}}]));
    let ctx = context();
    ctx.set_variable("ready", json!(false));

    let setter = Arc::clone(&ctx);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        setter.set_variable("ready", json!(true));
    });

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();
    assert_eq!(result.output, json!(true));

    // Ends through the workflow timeout instead
    let root = tree(json!([{"wait": {"condition": "false", "timeout": 1e19}}]));
    let err = exec
        .execute_workflow(&root, &context(), Some(Duration::from_millis(30)))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ORCA-030");
}

#[tokio::test]
async fn test_retry_bound() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&attempts);
    let exec = executor(FnTaskExecutor::new(move |_, _, _| {
        a.fetch_add(1, Ordering::SeqCst);
        async { anyhow::bail!("always fails") }
    }));
    let root = tree(json!([{"task": "flaky", "retry_count": 2}]));
    let ctx = context();

    let err = exec.execute_workflow(&root, &ctx, None).await.unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(err.error_code(), "ORCA-021");
    assert_eq!(err.details()["attempts"], 3);
    let node = ctx.node_context("flaky").unwrap();
    assert_eq!(node.state, ExecutionState::Failed);
    assert_eq!(node.retry_count, 2);
}

#[tokio::test]
async fn test_retry_recovers() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&attempts);
    let exec = executor(FnTaskExecutor::new(move |_, _, _| {
        let n = a.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                anyhow::bail!("transient");
            }
            Ok(json!("second try"))
        }
    }));
    let root = tree(json!([{"task": "flaky", "retry_count": 3}]));

    let result = exec.execute_workflow(&root, &context(), None).await.unwrap();
    assert_eq!(result.output, "second try");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Control flow
// ============================================================================

#[tokio::test]
async fn test_condition_true_runs_only_then() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let exec = logging_executor(Arc::clone(&log));
    let root = tree(json!([{
        "if": "flag == true",
        "then": [{"task": "yes"}],
        "else": [{"task": "no"}]
    }]));
    let ctx = context();
    ctx.set_variable("flag", json!(true));

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    assert_eq!(*log.lock(), vec!["yes".to_string()]);
    assert_eq!(result.output, "yes");
    assert!(ctx.result("no").is_none(), "untaken branch leaves no result");
}

#[tokio::test]
async fn test_condition_false_without_else_is_null() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let exec = logging_executor(Arc::clone(&log));
    let root = tree(json!([{"if": "flag == true", "then": [{"task": "yes"}]}]));
    let ctx = context();
    ctx.set_variable("flag", json!(false));

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    assert!(log.lock().is_empty());
    assert_eq!(result.output, Value::Null);
    assert_eq!(ctx.result("condition_1"), Some(Value::Null));
}

#[tokio::test]
async fn test_condition_reads_earlier_results() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    let exec = executor(FnTaskExecutor::new(move |task, _, _| {
        l.lock().push(task.clone());
        async move {
            Ok(match task.as_str() {
                "score" => json!({"value": 0.9}),
                other => json!(other),
            })
        }
    }));
    let root = tree(json!([
        {"task": "score"},
        {"if": "result.score.value > 0.5 and not (result.score.value > 1)", "then": [{"task": "publish"}], "else": {"task": "revise"}}
    ]));

    exec.execute_workflow(&root, &context(), None).await.unwrap();
    assert_eq!(*log.lock(), vec!["score".to_string(), "publish".to_string()]);
}

#[tokio::test]
async fn test_loop_stops_at_max_iterations() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let exec = executor(FnTaskExecutor::new(move |_, _, _| {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!(n)) }
    }));
    let root = tree(json!([{
        "loop": {"condition": "true", "body": [{"task": "tick"}], "max_iterations": 4}
    }]));
    let ctx = context();

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.output, json!([[0], [1], [2], [3]]));
    assert_eq!(ctx.result("tick"), Some(json!(3)), "last iteration wins");
}

#[tokio::test]
async fn test_loop_condition_checked_before_each_iteration() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let exec = executor(FnTaskExecutor::new(move |_, _, _| {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!({"done": n >= 2})) }
    }));
    let root = tree(json!([{
        "loop": "not (\"tick\" in results) or not result.tick.done",
        "body": [{"task": "tick"}],
        "max_iterations": 10
    }]));

    let result = exec.execute_workflow(&root, &context(), None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.output.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_wait_sees_variable_set_later() {
    let exec = executor(FnTaskExecutor::new(|_, _, _| async { Ok(json!(null)) }));
    let root = tree(json!([{"wait": {"condition": "ready", "timeout": 1, "poll_interval": 0.005}}]));
    let ctx = context();
    ctx.set_variable("ready", json!(false));

    let setter = Arc::clone(&ctx);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        setter.set_variable("ready", json!(true));
    });

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();
    assert_eq!(result.output, json!(true));
}

// ============================================================================
// Timeout and cancellation
// ============================================================================

#[tokio::test]
async fn test_workflow_timeout_is_an_error() {
    let exec = executor(FnTaskExecutor::new(|_, _, _| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!(null))
    }));
    let root = tree(json!([{"task": "slow"}]));
    let ctx = context();

    let err = exec
        .execute_workflow(&root, &ctx, Some(Duration::from_millis(20)))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "ORCA-030");
    assert!(ctx.is_cancelled());
    assert_eq!(ctx.node_state("slow"), Some(ExecutionState::Cancelled));
    assert_eq!(ctx.result("slow").unwrap()["error_code"], "ORCA-032");
}

#[tokio::test]
async fn test_cancel_during_execution() {
    let exec = executor(FnTaskExecutor::new(|task, _, _| async move {
        if task == "slow" {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(json!(task))
    }));
    let root = tree(json!([{"task": "first"}, {"task": "slow"}, {"task": "after"}]));
    let ctx = context();

    let (e, c) = (exec.clone(), Arc::clone(&ctx));
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        e.cancel_execution(&c);
    });

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(!result.success);
    assert_eq!(ctx.node_state("first"), Some(ExecutionState::Completed));
    assert_eq!(ctx.node_state("slow"), Some(ExecutionState::Cancelled));
    assert_eq!(ctx.node_state("after"), None, "never dispatched");
    assert_eq!(
        ctx.result("slow").unwrap()["error_code"],
        "ORCA-032",
        "in-flight outcome discarded"
    );
    assert!(ctx.result("after").is_none());

    // Second cancel changes nothing
    assert_eq!(exec.cancel_execution(&ctx), 0);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let exec = logging_executor(log);
    let root = tree(json!([{"task": "a"}, {"task": "b"}]));
    let ctx = context();

    let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();
    let before = ctx.results_snapshot();

    assert_eq!(exec.cancel_execution(&ctx), 0);
    assert_eq!(exec.cancel_execution(&ctx), 0);
    assert_eq!(ctx.results_snapshot(), before);
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(ctx.node_state("b"), Some(ExecutionState::Completed));
}

// ============================================================================
// Result completeness
// ============================================================================

#[tokio::test]
async fn test_results_cover_exactly_started_nodes() {
    let exec = executor(FnTaskExecutor::new(|task, _, _| async move {
        if task == "broken" {
            anyhow::bail!("no luck");
        }
        Ok(json!(task))
    }));
    let root = tree(json!([
        {"task": "ok"},
        {"parallel": [{"task": "p1"}, {"task": "p2"}], "fail_fast": false},
        {"task": "broken"},
        {"task": "unreached"}
    ]));
    let ctx = context();

    exec.execute_workflow(&root, &ctx, None).await.unwrap_err();

    let mut keys: Vec<String> = ctx.results_snapshot().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["broken", "ok", "p1", "p2", "parallel_1", "sequence_1"]);
    for node in ctx.node_contexts() {
        assert!(node.state.is_terminal() || node.state == ExecutionState::Pending);
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_unknown_tool_is_an_error() {
    let catalog = Catalog::unrestricted().with_tools(["web_search"]);
    let root = tree(json!([{"task": "search", "tools": ["web_search", "scraper"]}]));

    let result = DslValidator::new(ResourceLimits::default(), catalog).validate(&root);

    assert!(!result.is_valid);
    let errors: Vec<_> = result.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, Severity::Error);
    assert!(errors[0].message.contains("scraper"));
}
