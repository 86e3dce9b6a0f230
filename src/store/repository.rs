//! ResultRepository - persistence contract for finished executions
//!
//! The orchestrator hands every terminal response to a repository as an
//! [`ExecutionRecord`]. Real backends live outside the engine; the
//! in-memory implementation serves tests and the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::orchestrator::{WorkflowExecutionResponse, WorkflowStatus};

/// Persisted summary of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub success: bool,
    /// Per-node results map (null when nothing ran)
    pub result: Value,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub retries: u32,
    /// Wall time in seconds
    pub execution_time: f64,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn from_response(workflow_id: &str, response: &WorkflowExecutionResponse) -> Self {
        Self {
            execution_id: response.execution_id.clone(),
            workflow_id: workflow_id.to_string(),
            status: response.status,
            success: response.success,
            result: response.result.clone().unwrap_or(Value::Null),
            error: response.error.clone(),
            error_code: response.error_code.clone(),
            retries: response.retries,
            execution_time: response.execution_time.as_secs_f64(),
            recorded_at: Utc::now(),
        }
    }
}

/// Storage contract: `save` / `get` / `find`
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Insert or replace the record for its execution id
    async fn save(&self, record: ExecutionRecord) -> Result<()>;

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// All records of a workflow, oldest first
    async fn find(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>>;
}

/// Thread-safe in-memory repository (lock-free)
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    /// execution_id → record
    records: Arc<DashMap<Arc<str>, ExecutionRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("len", &self.len())
            .finish()
    }
}

#[async_trait]
impl ResultRepository for InMemoryRepository {
    async fn save(&self, record: ExecutionRecord) -> Result<()> {
        self.records
            .insert(Arc::from(record.execution_id.as_str()), record);
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.records.get(execution_id).map(|r| r.value().clone()))
    }

    async fn find(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>> {
        let mut found: Vec<ExecutionRecord> = self
            .records
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| r.recorded_at);
        Ok(found)
    }
}
