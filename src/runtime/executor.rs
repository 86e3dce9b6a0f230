//! DSL Executor - the tree interpreter
//!
//! Walks a validated [`DslNode`] tree, dispatching on [`NodeKind`]:
//!
//! - TASK: resolve `${...}` parameters, call the [`TaskExecutor`], retry with a fixed delay
//! - SEQUENCE: children in order
//! - PARALLEL: children as futures in one `FuturesUnordered`, bounded by a semaphore;
//!   siblings are cancelled by dropping their futures
//! - CONDITION: evaluate once, run the matching branch
//! - LOOP: check the condition before each iteration, capped by max_iterations
//! - WAIT: poll a condition until true or timeout
//!
//! Cancellation is cooperative: the token is checked before each dispatch,
//! between retries, between iterations and on every wait poll. A tool call in
//! flight is awaited and its outcome discarded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::dsl::{Branch, DslNode, LoopConfig, NodeKind, ParallelConfig, TaskConfig, WaitConfig};
use crate::error::{OrcaError, Result};
use crate::event::{EventEmitter, EventKind, NoopEmitter};
use crate::expr::{ConditionEvaluator, VariableResolver};
use crate::limits::{
    DEFAULT_LOOP_ITERATIONS, DEFAULT_POLL_INTERVAL, DEFAULT_TASK_RETRY_DELAY, DEFAULT_WAIT_TIMEOUT,
};

use super::context::DslExecutionContext;
use super::result::{error_value, ExecutionResult, ExecutionStatus};
use super::task::TaskExecutor;

/// Runtime defaults for nodes that leave them unset
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Fixed delay between attempts of a failing task
    pub task_retry_delay: Duration,
    pub default_poll_interval: Duration,
    pub default_wait_timeout: Duration,
    pub default_max_iterations: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_retry_delay: DEFAULT_TASK_RETRY_DELAY,
            default_poll_interval: DEFAULT_POLL_INTERVAL,
            default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            default_max_iterations: DEFAULT_LOOP_ITERATIONS,
        }
    }
}

#[derive(Clone)]
pub struct DslExecutor {
    task_executor: Arc<dyn TaskExecutor>,
    config: ExecutorConfig,
    evaluator: Arc<ConditionEvaluator>,
    resolver: VariableResolver,
    emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for DslExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DslExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DslExecutor {
    pub fn new(task_executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            task_executor,
            config: ExecutorConfig::default(),
            evaluator: Arc::new(ConditionEvaluator::new()),
            resolver: VariableResolver::new(),
            emitter: Arc::new(NoopEmitter),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a tree to completion
    ///
    /// - completed → `Ok(status = Completed)`
    /// - cancelled → `Ok(status = Cancelled)`
    /// - timed out → `Err(ExecutionTimeout)`, after cancelling the token
    /// - a node failure reaching the root → `Err` with that failure
    #[instrument(
        name = "execute_workflow",
        skip_all,
        fields(workflow_id = %context.workflow_id, execution_id = %context.execution_id)
    )]
    pub async fn execute_workflow(
        &self,
        root: &DslNode,
        context: &Arc<DslExecutionContext>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        info!(nodes = root.node_count(), "workflow execution started");

        let run = self.execute_node(root, context);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    context.cancel_token().cancel();
                    let cancelled = context.cancel_running();
                    warn!(timeout_ms = limit.as_millis() as u64, cancelled, "workflow timed out");
                    return Err(OrcaError::ExecutionTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => run.await,
        };

        match outcome {
            Ok(output) => {
                info!(elapsed_ms = context.elapsed().as_millis() as u64, "workflow execution completed");
                Ok(ExecutionResult::from_context(
                    context,
                    ExecutionStatus::Completed,
                    output,
                    None,
                ))
            }
            Err(e) if e.is_cancelled() => {
                info!("workflow execution cancelled");
                Ok(ExecutionResult::from_context(
                    context,
                    ExecutionStatus::Cancelled,
                    Value::Null,
                    Some(e.to_string()),
                ))
            }
            Err(e) => {
                warn!(error = %e, "workflow execution failed");
                Err(e)
            }
        }
    }

    /// Cancel a run: set the token and mark RUNNING nodes CANCELLED
    ///
    /// Idempotent; on a finished run nothing changes.
    pub fn cancel_execution(&self, context: &DslExecutionContext) -> usize {
        context.cancel_token().cancel();
        let marked = context.cancel_running();
        info!(execution_id = %context.execution_id, marked, "execution cancelled");
        marked
    }

    fn cancelled(context: &DslExecutionContext) -> OrcaError {
        OrcaError::Cancelled {
            execution_id: context.execution_id.to_string(),
        }
    }

    /// Recursive dispatch (boxed: async recursion)
    fn execute_node<'a>(
        &'a self,
        node: &'a DslNode,
        ctx: &'a Arc<DslExecutionContext>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            // Cancelled before dispatch: registered, but never leaves PENDING
            if ctx.is_cancelled() {
                ctx.update_node(&node.id, |_| ());
                return Err(Self::cancelled(ctx));
            }

            ctx.update_node(&node.id, |n| n.start());
            self.emitter.emit(EventKind::NodeStarted {
                node_id: Arc::clone(&node.id),
                node_type: node.node_type(),
            });
            debug!(node_id = %node.id, node_type = %node.node_type(), "node started");
            let started = Instant::now();

            let outcome = match &node.kind {
                NodeKind::Task(cfg) => self.execute_task(node, cfg, ctx).await,
                NodeKind::Sequence => self.execute_sequence(node, ctx).await,
                NodeKind::Parallel(cfg) => self.execute_parallel(node, cfg, ctx).await,
                NodeKind::Condition(cfg) => self.execute_condition(node, &cfg.condition, ctx).await,
                NodeKind::Loop(cfg) => self.execute_loop(node, cfg, ctx).await,
                NodeKind::Wait(cfg) => self.execute_wait(cfg, ctx).await,
            };

            self.record(node, ctx, &outcome, started);
            outcome
        })
    }

    /// Write the node's terminal state and result; refused transitions write nothing
    fn record(&self, node: &DslNode, ctx: &DslExecutionContext, outcome: &Result<Value>, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(value) => {
                if ctx.update_node(&node.id, |n| n.complete(value.clone())) {
                    ctx.set_result(Arc::clone(&node.id), value.clone());
                    self.emitter.emit(EventKind::NodeCompleted {
                        node_id: Arc::clone(&node.id),
                        output: Arc::new(value.clone()),
                        duration_ms,
                    });
                }
            }
            Err(e) if e.is_cancelled() => {
                if ctx.cancel_node(&node.id) {
                    self.emitter.emit(EventKind::NodeCancelled {
                        node_id: Arc::clone(&node.id),
                    });
                }
            }
            Err(e) => {
                let value = error_value(&node.id, e);
                if ctx.update_node(&node.id, |n| n.fail(e.to_string(), value.clone())) {
                    ctx.set_result(Arc::clone(&node.id), value);
                    self.emitter.emit(EventKind::NodeFailed {
                        node_id: Arc::clone(&node.id),
                        error: e.to_string(),
                        duration_ms,
                    });
                }
            }
        }
    }

    async fn execute_task(
        &self,
        node: &DslNode,
        cfg: &TaskConfig,
        ctx: &Arc<DslExecutionContext>,
    ) -> Result<Value> {
        let parameters = self.resolver.resolve_variables(&cfg.parameters, &**ctx);
        let attempts = cfg.retry_count.saturating_add(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                ctx.update_node(&node.id, |n| n.record_retry());
                self.emitter.emit(EventKind::TaskRetrying {
                    node_id: Arc::clone(&node.id),
                    attempt,
                    error: last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                });
                tokio::select! {
                    _ = ctx.cancel_token().cancelled() => return Err(Self::cancelled(ctx)),
                    _ = tokio::time::sleep(self.config.task_retry_delay) => {}
                }
            }

            let call = self
                .task_executor
                .execute_task(&cfg.task, &cfg.tools, &parameters);
            let outcome = match cfg.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result.map_err(|e| self.task_error(cfg, e)),
                    Err(_) => Err(OrcaError::TaskTimeout {
                        task: cfg.task.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => call.await.map_err(|e| self.task_error(cfg, e)),
            };

            // The call finished after a cancel: discard its outcome
            if ctx.is_cancelled() {
                return Err(Self::cancelled(ctx));
            }

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(node_id = %node.id, attempt = attempt + 1, attempts, error = %e, "task attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| OrcaError::NodeFailed {
            node_id: node.id.to_string(),
            reason: "task never ran".to_string(),
        });
        if attempts == 1 {
            return Err(last_error);
        }
        Err(OrcaError::RetryExhausted {
            node_id: node.id.to_string(),
            attempts,
            last_error: last_error.to_string(),
        })
    }

    fn task_error(&self, cfg: &TaskConfig, error: anyhow::Error) -> OrcaError {
        OrcaError::TaskFailed {
            task: cfg.task.clone(),
            reason: format!("{:#}", error),
        }
    }

    async fn execute_sequence(&self, node: &DslNode, ctx: &Arc<DslExecutionContext>) -> Result<Value> {
        let mut results = Vec::with_capacity(node.children.len());
        for child in &node.children {
            // execute_node checks the token before dispatching the child
            results.push(self.execute_node(child, ctx).await?);
        }
        Ok(Value::Array(results))
    }

    async fn execute_parallel(
        &self,
        node: &DslNode,
        cfg: &ParallelConfig,
        ctx: &Arc<DslExecutionContext>,
    ) -> Result<Value> {
        let n = node.children.len();
        let limit = cfg
            .max_concurrency
            .unwrap_or(n)
            .clamp(1, Semaphore::MAX_PERMITS);
        let gate = Semaphore::new(limit);
        let gate = &gate;

        let mut pending: FuturesUnordered<_> = node
            .children
            .iter()
            .enumerate()
            .map(move |(i, child)| async move {
                let Ok(_permit) = gate.acquire().await else {
                    return (i, Err(Self::cancelled(ctx)));
                };
                (i, self.execute_node(child, ctx).await)
            })
            .collect();

        let mut slots = vec![Value::Null; n];
        let mut finished = vec![false; n];
        let mut first_error = None;
        let mut winner = None;

        loop {
            let Some((i, outcome)) = pending.next().await else {
                break;
            };
            finished[i] = true;
            match outcome {
                Ok(value) => {
                    slots[i] = value;
                    if !cfg.wait_for_all {
                        winner = Some(i);
                        break;
                    }
                }
                // First-success mode keeps draining until a child succeeds
                Err(e) if e.is_cancelled() || (cfg.fail_fast && cfg.wait_for_all) => {
                    drop(pending);
                    self.cancel_unfinished(node, &finished, ctx);
                    return Err(e);
                }
                Err(e) => {
                    slots[i] = error_value(&node.children[i].id, &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        drop(pending);
        if cfg.wait_for_all {
            return Ok(Value::Array(slots));
        }
        match (winner, first_error) {
            (Some(i), _) => {
                debug!(node_id = %node.id, winner = %node.children[i].id, "first child completed");
                self.cancel_unfinished(node, &finished, ctx);
                Ok(Value::Array(slots))
            }
            (None, Some(e)) if cfg.fail_fast => Err(e),
            _ => Ok(Value::Array(slots)),
        }
    }

    fn cancel_unfinished(&self, node: &DslNode, finished: &[bool], ctx: &DslExecutionContext) {
        for (child, done) in node.children.iter().zip(finished) {
            if !done {
                let marked = ctx.cancel_running_in(child);
                if marked > 0 {
                    debug!(node_id = %child.id, marked, "sibling cancelled");
                    self.emitter.emit(EventKind::NodeCancelled {
                        node_id: Arc::clone(&child.id),
                    });
                }
            }
        }
    }

    async fn execute_condition(
        &self,
        node: &DslNode,
        condition: &str,
        ctx: &Arc<DslExecutionContext>,
    ) -> Result<Value> {
        let holds = self.evaluator.evaluate(condition, &**ctx);
        let branch = if holds { Branch::Then } else { Branch::Else };
        debug!(node_id = %node.id, condition, ?branch, "condition evaluated");

        match node.branch_child(branch) {
            Some(child) => self.execute_node(child, ctx).await,
            None => Ok(Value::Null),
        }
    }

    async fn execute_loop(
        &self,
        node: &DslNode,
        cfg: &LoopConfig,
        ctx: &Arc<DslExecutionContext>,
    ) -> Result<Value> {
        let max = cfg.max_iterations.unwrap_or(self.config.default_max_iterations);
        let mut iterations = Vec::new();

        for i in 0..max {
            if ctx.is_cancelled() {
                return Err(Self::cancelled(ctx));
            }
            if !self.evaluator.evaluate(&cfg.condition, &**ctx) {
                break;
            }
            if i > 0 {
                node.children.iter().for_each(|child| ctx.rearm(child));
            }

            let mut body = Vec::with_capacity(node.children.len());
            let mut failure = None;
            for child in &node.children {
                match self.execute_node(child, ctx).await {
                    Ok(value) => body.push(value),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            match failure {
                None => iterations.push(Value::Array(body)),
                Some(e) if cfg.break_on_error => {
                    warn!(node_id = %node.id, iteration = i, error = %e, "loop body failed, breaking");
                    break;
                }
                Some(e) => {
                    warn!(node_id = %node.id, iteration = i, error = %e, "loop body failed, continuing");
                    iterations.push(Value::Null);
                }
            }
        }

        debug!(node_id = %node.id, iterations = iterations.len(), "loop finished");
        Ok(Value::Array(iterations))
    }

    async fn execute_wait(&self, cfg: &WaitConfig, ctx: &Arc<DslExecutionContext>) -> Result<Value> {
        let timeout = cfg.timeout.unwrap_or(self.config.default_wait_timeout);
        let interval = cfg
            .poll_interval
            .unwrap_or(self.config.default_poll_interval)
            .max(Duration::from_millis(1));
        // Unrepresentable deadline: poll until the condition holds or the run is cancelled
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        loop {
            if ctx.is_cancelled() {
                return Err(Self::cancelled(ctx));
            }
            if self.evaluator.evaluate(&cfg.condition, &**ctx) {
                return Ok(Value::Bool(true));
            }
            let nap = match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Ok(Value::Bool(false));
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => return Err(Self::cancelled(ctx)),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::DslParser;
    use crate::runtime::context::ExecutionState;
    use crate::runtime::task::FnTaskExecutor;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            task_retry_delay: Duration::from_millis(1),
            default_poll_interval: Duration::from_millis(5),
            default_wait_timeout: Duration::from_millis(50),
            default_max_iterations: 100,
        }
    }

    fn tree(steps: Value) -> DslNode {
        DslParser::new()
            .parse(steps.as_array().unwrap())
            .into_result()
            .unwrap()
    }

    fn context() -> Arc<DslExecutionContext> {
        Arc::new(DslExecutionContext::new("wf", "exec-1", Map::new()))
    }

    fn executor(exec: FnTaskExecutor) -> DslExecutor {
        DslExecutor::new(Arc::new(exec)).with_config(fast_config())
    }

    #[tokio::test]
    async fn error_values_record_failures() {
        let exec = executor(FnTaskExecutor::new(|_, _, _| async { anyhow::bail!("nope") }));
        let root = tree(json!([{"task": "broken"}]));
        let ctx = context();
        let err = exec.execute_workflow(&root, &ctx, None).await.unwrap_err();
        assert_eq!(err.error_code(), "ORCA-020");
        let recorded = ctx.result("broken").unwrap();
        assert_eq!(recorded["error_code"], "ORCA-020");
        assert_eq!(recorded["node_id"], "broken");
        assert_eq!(ctx.node_state("broken"), Some(ExecutionState::Failed));
    }

    #[tokio::test]
    async fn task_timeout_is_a_failure() {
        let exec = executor(FnTaskExecutor::new(|_, _, _| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!(1))
        }));
        let root = tree(json!([{"task": "slow", "timeout": 0.01}]));
        let err = exec.execute_workflow(&root, &context(), None).await.unwrap_err();
        assert_eq!(err.error_code(), "ORCA-031");
    }

    #[tokio::test]
    async fn loop_break_on_error_stops_without_failing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let exec = executor(FnTaskExecutor::new(move |_, _, _| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 1 {
                    anyhow::bail!("second iteration fails");
                }
                Ok(json!(n))
            }
        }));
        let root = tree(json!([{
            "loop": {"condition": "true", "body": [{"task": "tick"}], "max_iterations": 5}
        }]));
        let result = exec.execute_workflow(&root, &context(), None).await.unwrap();
        assert_eq!(result.output, json!([[0]]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loop_continue_on_error_records_null() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let exec = executor(FnTaskExecutor::new(move |_, _, _| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 1 {
                    anyhow::bail!("flaky");
                }
                Ok(json!(n))
            }
        }));
        let root = tree(json!([{
            "loop": "true", "body": [{"task": "tick"}], "max_iterations": 3, "break_on_error": false
        }]));
        let result = exec.execute_workflow(&root, &context(), None).await.unwrap();
        assert_eq!(result.output, json!([[0], null, [2]]));
    }

    #[tokio::test]
    async fn wait_times_out_false_and_sees_variables() {
        let exec = executor(FnTaskExecutor::new(|_, _, _| async { Ok(json!(null)) }));
        let root = tree(json!([{"wait": {"condition": "ready == true", "timeout": 0.03}}]));

        let ctx = context();
        let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();
        assert_eq!(result.output, json!(false));

        let ctx = context();
        ctx.set_variable("ready", json!(true));
        let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();
        assert_eq!(result.output, json!(true));
    }

    #[tokio::test]
    async fn cancelled_before_start_leaves_root_pending() {
        let exec = executor(FnTaskExecutor::new(|_, _, _| async { Ok(json!(1)) }));
        let root = tree(json!([{"task": "a"}, {"task": "b"}]));
        let ctx = context();
        exec.cancel_execution(&ctx);
        let result = exec.execute_workflow(&root, &ctx, None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
        assert!(!result.success);
        assert_eq!(ctx.node_state("sequence_1"), Some(ExecutionState::Pending));
        assert!(ctx.result("a").is_none());
    }

    #[tokio::test]
    async fn parameters_are_resolved_before_the_call() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let exec = executor(FnTaskExecutor::new(move |task, _, params| {
            s.lock().push((task.clone(), Value::Object(params)));
            async move { Ok(json!({"len": task.len()})) }
        }));
        let root = tree(json!([
            {"task": "fetch"},
            {"task": "summarize", "parameters": {"n": "${result.fetch.len}", "note": "got ${result.fetch.len}"}}
        ]));
        exec.execute_workflow(&root, &context(), None).await.unwrap();
        let calls = seen.lock();
        assert_eq!(calls[1].1, json!({"n": 5, "note": "got 5"}));
    }
}
