//! Execution context - per-run mutable state
//!
//! One [`DslExecutionContext`] per workflow run, shared by every node future
//! through an `Arc`. Results and node contexts live in `DashMap`s keyed by
//! node id; node ids are unique, so concurrent writers never touch the same key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::dsl::{DslNode, NodeId};
use crate::error::OrcaError;
use crate::expr::Scope;

use super::result::error_value;

/// Per-node lifecycle: PENDING → RUNNING → {COMPLETED | FAILED | CANCELLED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Runtime record of one node
///
/// Transitions are monotonic: every method refuses to move a node out of a
/// terminal state and returns whether it applied.
#[derive(Debug, Clone, Serialize)]
pub struct NodeExecutionContext {
    pub node_id: NodeId,
    pub state: ExecutionState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl NodeExecutionContext {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: ExecutionState::Pending,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    pub fn start(&mut self) -> bool {
        if self.state != ExecutionState::Pending {
            return false;
        }
        self.state = ExecutionState::Running;
        self.start_time = Some(Utc::now());
        true
    }

    pub fn complete(&mut self, result: Value) -> bool {
        self.finish(ExecutionState::Completed, Some(result), None)
    }

    pub fn fail(&mut self, error: impl Into<String>, result: Value) -> bool {
        self.finish(ExecutionState::Failed, Some(result), Some(error.into()))
    }

    pub fn cancel(&mut self, result: Value) -> bool {
        let error = result["error"].as_str().map(str::to_string);
        self.finish(ExecutionState::Cancelled, Some(result), error)
    }

    fn finish(&mut self, state: ExecutionState, result: Option<Value>, error: Option<String>) -> bool {
        if self.state != ExecutionState::Running {
            return false;
        }
        self.state = state;
        self.end_time = Some(Utc::now());
        self.result = result;
        self.error = error;
        true
    }

    /// Count one retry (only while running)
    pub fn record_retry(&mut self) {
        if self.state == ExecutionState::Running {
            self.retry_count += 1;
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.start_time?, self.end_time?);
        (end - start).to_std().ok()
    }
}

/// Node counts by terminal state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Shared state of one workflow run
#[derive(Debug)]
pub struct DslExecutionContext {
    pub workflow_id: Arc<str>,
    pub execution_id: Arc<str>,
    variables: RwLock<Map<String, Value>>,
    results: DashMap<NodeId, Value>,
    node_contexts: DashMap<NodeId, NodeExecutionContext>,
    cancel_token: CancellationToken,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl DslExecutionContext {
    pub fn new(
        workflow_id: impl Into<Arc<str>>,
        execution_id: impl Into<Arc<str>>,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            variables: RwLock::new(variables),
            results: DashMap::new(),
            node_contexts: DashMap::new(),
            cancel_token: CancellationToken::new(),
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Share a token owned elsewhere (the orchestrator's registry)
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    // ─────────────────────────────────────────────────────────────
    // Variables
    // ─────────────────────────────────────────────────────────────

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.read().get(name).cloned()
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.write().insert(name.into(), value);
    }

    pub fn variables_snapshot(&self) -> Map<String, Value> {
        self.variables.read().clone()
    }

    // ─────────────────────────────────────────────────────────────
    // Results
    // ─────────────────────────────────────────────────────────────

    pub fn result(&self, node_id: &str) -> Option<Value> {
        self.results.get(node_id).map(|r| r.value().clone())
    }

    pub fn set_result(&self, node_id: NodeId, value: Value) {
        self.results.insert(node_id, value);
    }

    pub fn has_result(&self, node_id: &str) -> bool {
        self.results.contains_key(node_id)
    }

    pub fn results_snapshot(&self) -> Map<String, Value> {
        self.results
            .iter()
            .map(|r| (r.key().to_string(), r.value().clone()))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Node contexts
    // ─────────────────────────────────────────────────────────────

    pub fn node_context(&self, node_id: &str) -> Option<NodeExecutionContext> {
        self.node_contexts.get(node_id).map(|r| r.value().clone())
    }

    pub fn node_state(&self, node_id: &str) -> Option<ExecutionState> {
        self.node_contexts.get(node_id).map(|r| r.state)
    }

    /// Apply an update to a node's context, creating it PENDING if absent
    ///
    /// The entry lock is held only for the closure: never await inside it.
    pub fn update_node<R>(&self, node: &NodeId, f: impl FnOnce(&mut NodeExecutionContext) -> R) -> R {
        let mut entry = self
            .node_contexts
            .entry(Arc::clone(node))
            .or_insert_with(|| NodeExecutionContext::new(Arc::clone(node)));
        f(entry.value_mut())
    }

    /// Fresh PENDING contexts for a subtree (next loop iteration)
    pub fn rearm(&self, node: &DslNode) {
        for n in node.iter() {
            self.node_contexts
                .insert(Arc::clone(&n.id), NodeExecutionContext::new(Arc::clone(&n.id)));
        }
    }

    /// RUNNING → CANCELLED, recording the cancellation error value
    ///
    /// Every CANCELLED node gets that value in `results`, whichever path cancelled it.
    pub fn cancel_node(&self, node_id: &NodeId) -> bool {
        let value = error_value(
            node_id,
            &OrcaError::Cancelled {
                execution_id: self.execution_id.to_string(),
            },
        );
        let applied = self
            .node_contexts
            .get_mut(&**node_id)
            .is_some_and(|mut ctx| ctx.cancel(value.clone()));
        if applied {
            self.results.insert(Arc::clone(node_id), value);
        }
        applied
    }

    /// Mark every RUNNING node CANCELLED; returns how many changed
    pub fn cancel_running(&self) -> usize {
        let running: Vec<NodeId> = self
            .node_contexts
            .iter()
            .filter(|entry| entry.state == ExecutionState::Running)
            .map(|entry| Arc::clone(entry.key()))
            .collect();
        running.iter().filter(|id| self.cancel_node(id)).count()
    }

    /// Mark RUNNING nodes of a subtree CANCELLED (dropped parallel siblings)
    pub fn cancel_running_in(&self, node: &DslNode) -> usize {
        node.iter().filter(|n| self.cancel_node(&n.id)).count()
    }

    pub fn state_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for entry in self.node_contexts.iter() {
            match entry.state {
                ExecutionState::Completed => counts.completed += 1,
                ExecutionState::Failed => counts.failed += 1,
                ExecutionState::Cancelled => counts.cancelled += 1,
                ExecutionState::Pending | ExecutionState::Running => {}
            }
        }
        counts
    }

    /// Cloned node contexts, sorted by node id
    pub fn node_contexts(&self) -> Vec<NodeExecutionContext> {
        let mut all: Vec<_> = self.node_contexts.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }
}

impl Scope for DslExecutionContext {
    fn variable(&self, name: &str) -> Option<Value> {
        DslExecutionContext::variable(self, name)
    }

    fn result(&self, node_id: &str) -> Option<Value> {
        DslExecutionContext::result(self, node_id)
    }

    fn variables(&self) -> Value {
        Value::Object(self.variables_snapshot())
    }

    fn results(&self) -> Value {
        Value::Object(self.results_snapshot())
    }
}
