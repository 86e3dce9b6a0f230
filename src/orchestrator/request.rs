//! Orchestrator request/response value objects

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::dsl::ValidationResult;
use crate::error::OrcaError;

/// What the orchestrator does after validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Report validation findings only
    ValidateOnly,
    /// Report the execution plan; no task runs
    DryRun,
    #[default]
    Execute,
}

mod opt_secs {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        secs.map(|s| {
            Duration::try_from_secs_f64(s).map_err(|e| serde::de::Error::custom(e.to_string()))
        })
        .transpose()
    }
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionRequest {
    pub workflow_id: String,
    /// Caller-chosen id (callbacks may be registered for it up front)
    #[serde(default)]
    pub execution_id: Option<String>,
    pub steps: Vec<Value>,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Seed for the run's variables
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Whole-workflow timeout in seconds
    #[serde(default, with = "opt_secs")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl WorkflowExecutionRequest {
    pub fn new(workflow_id: impl Into<String>, steps: Vec<Value>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: None,
            steps,
            mode: ExecutionMode::default(),
            parameters: Map::new(),
            timeout: None,
            max_retries: None,
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Execution lifecycle as seen by orchestrator callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowExecutionResponse {
    pub execution_id: String,
    pub status: WorkflowStatus,
    pub success: bool,
    pub message: String,
    /// EXECUTE: per-node results. DRY_RUN: the plan.
    pub result: Option<Value>,
    pub validation_result: Option<ValidationResult>,
    /// Seconds when serialized
    #[serde(serialize_with = "as_secs")]
    pub execution_time: Duration,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub error_details: Vec<Value>,
    /// Whole-workflow retries performed
    pub retries: u32,
}

impl WorkflowExecutionResponse {
    pub fn success(
        execution_id: impl Into<String>,
        message: impl Into<String>,
        result: Option<Value>,
        execution_time: Duration,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: WorkflowStatus::Completed,
            success: true,
            message: message.into(),
            result,
            validation_result: None,
            execution_time,
            error: None,
            error_code: None,
            error_details: Vec::new(),
            retries: 0,
        }
    }

    /// Failed response carrying the error's code and structured details
    ///
    /// Validation failures itemize every ERROR issue in `error_details`.
    pub fn failure(
        execution_id: impl Into<String>,
        status: WorkflowStatus,
        error: &OrcaError,
        execution_time: Duration,
    ) -> Self {
        let error_details = match error {
            OrcaError::ValidationFailed { issues } => issues
                .iter()
                .filter(|i| i.is_error())
                .filter_map(|i| serde_json::to_value(i).ok())
                .collect(),
            other => vec![other.details()],
        };
        Self {
            execution_id: execution_id.into(),
            status,
            success: false,
            message: format!("Workflow {}", status),
            result: None,
            validation_result: None,
            execution_time,
            error: Some(error.to_string()),
            error_code: Some(error.error_code().to_string()),
            error_details,
            retries: 0,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_validation(mut self, validation: ValidationResult) -> Self {
        self.validation_result = Some(validation);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{Severity, ValidationIssue};
    use serde_json::json;

    #[test]
    fn mode_serializes_snake_case() {
        assert_eq!(serde_json::to_value(ExecutionMode::ValidateOnly).unwrap(), "validate_only");
        assert_eq!(serde_json::to_value(ExecutionMode::DryRun).unwrap(), "dry_run");
        assert_eq!(ExecutionMode::default(), ExecutionMode::Execute);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: WorkflowExecutionRequest = serde_json::from_value(json!({
            "workflow_id": "wf",
            "steps": [{"task": "t1"}],
            "timeout": 2.5
        }))
        .unwrap();
        assert_eq!(req.mode, ExecutionMode::Execute);
        assert_eq!(req.timeout, Some(Duration::from_millis(2500)));
        assert!(req.execution_id.is_none());
        assert!(req.parameters.is_empty());
    }

    #[test]
    fn validation_failure_itemizes_errors_only() {
        let err = OrcaError::ValidationFailed {
            issues: vec![
                ValidationIssue::new(Severity::Error, "unknown tool 'x'", Some("t1")),
                ValidationIssue::new(Severity::Warning, "unbounded loop", Some("loop_1")),
                ValidationIssue::new(Severity::Error, "empty task name", Some("t2")),
            ],
        };
        let resp = WorkflowExecutionResponse::failure("e1", WorkflowStatus::Failed, &err, Duration::ZERO);
        assert!(!resp.success);
        assert_eq!(resp.error_code.as_deref(), Some("ORCA-010"));
        assert_eq!(resp.error_details.len(), 2);
        assert_eq!(resp.error_details[0]["node_id"], "t1");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::TimedOut.is_terminal());
        assert_eq!(WorkflowStatus::TimedOut.to_string(), "timed_out");
    }
}
