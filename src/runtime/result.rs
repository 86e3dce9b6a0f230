//! Execution result - immutable outcome of one executor run

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::OrcaError;

use super::context::DslExecutionContext;

/// Value recorded for a node that ended FAILED or CANCELLED
pub fn error_value(node_id: &str, error: &OrcaError) -> Value {
    json!({
        "error": error.to_string(),
        "error_code": error.error_code(),
        "node_id": node_id,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Cancelled,
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionMetadata {
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub cancelled_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub success: bool,
    /// Every started node's value, keyed by node id
    pub result: Map<String, Value>,
    /// Value of the root node (null when it never finished)
    pub output: Value,
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    /// Snapshot a context into a result
    pub fn from_context(
        context: &DslExecutionContext,
        status: ExecutionStatus,
        output: Value,
        error: Option<String>,
    ) -> Self {
        let counts = context.state_counts();
        Self {
            status,
            success: status == ExecutionStatus::Completed,
            result: context.results_snapshot(),
            output,
            metadata: ExecutionMetadata {
                duration: context.elapsed(),
                completed_nodes: counts.completed,
                failed_nodes: counts.failed,
                cancelled_nodes: counts.cancelled,
                error,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ExecutionStatus::Cancelled
    }
}
