//! Orca Error Types with Error Codes
//!
//! Error code ranges:
//! - ORCA-000-009: Parse errors (step lists, node ids, workflow files)
//! - ORCA-010-019: Validation errors
//! - ORCA-020-029: Execution runtime errors (node failures, retries)
//! - ORCA-030-039: Timeout and cancellation
//! - ORCA-040-049: Configuration misuse (concurrency, hooks, registry)
//! - ORCA-050-059: Expression errors (conditions, placeholders)
//! - ORCA-090-099: Infrastructure (config, IO, serialization, repository)

use serde_json::{json, Value};
use thiserror::Error;

use crate::dsl::ValidationIssue;

pub type Result<T> = std::result::Result<T, OrcaError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    let errors: Vec<_> = issues.iter().filter(|i| i.is_error()).collect();
    match errors.len() {
        0 => "no blocking issues".to_string(),
        1 => errors[0].to_string(),
        n => format!(
            "{} errors: {}",
            n,
            errors
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

#[derive(Error, Debug)]
pub enum OrcaError {
    // ═══════════════════════════════════════════
    // PARSE ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[ORCA-001] Failed to parse workflow: {details}")]
    ParseError { details: String },

    #[error("[ORCA-002] Invalid step at {path}: {reason}")]
    InvalidStep { path: String, reason: String },

    #[error("[ORCA-003] Duplicate node id '{id}'")]
    DuplicateNodeId { id: String },

    #[error("[ORCA-004] Invalid node id '{id}': {reason}")]
    InvalidNodeId { id: String, reason: String },

    #[error("[ORCA-005] Invalid schema version: expected '{expected}', got '{actual}'")]
    InvalidSchema { expected: String, actual: String },

    // ═══════════════════════════════════════════
    // VALIDATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[ORCA-010] Workflow validation failed: {}", format_issues(.issues))]
    ValidationFailed { issues: Vec<ValidationIssue> },

    // ═══════════════════════════════════════════
    // EXECUTION RUNTIME ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[ORCA-020] Task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("[ORCA-021] Node '{node_id}' failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        node_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("[ORCA-022] Node '{node_id}' failed: {reason}")]
    NodeFailed { node_id: String, reason: String },

    // ═══════════════════════════════════════════
    // TIMEOUT / CANCELLATION (030-039)
    // ═══════════════════════════════════════════
    #[error("[ORCA-030] Workflow execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("[ORCA-031] Task '{task}' timed out after {timeout_ms}ms")]
    TaskTimeout { task: String, timeout_ms: u64 },

    #[error("[ORCA-032] Execution '{execution_id}' was cancelled")]
    Cancelled { execution_id: String },

    // ═══════════════════════════════════════════
    // CONFIGURATION MISUSE (040-049)
    // ═══════════════════════════════════════════
    #[error("[ORCA-040] Concurrency misconfiguration: {reason}")]
    ExecutionConcurrency { reason: String },

    #[error("[ORCA-041] Cannot register callback for '{execution_id}': {reason}")]
    HookRegistration {
        execution_id: String,
        reason: String,
    },

    #[error("[ORCA-042] Execution '{execution_id}' not found")]
    ExecutionNotFound { execution_id: String },

    // ═══════════════════════════════════════════
    // EXPRESSION ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[ORCA-050] Invalid expression '{expression}' at position {position}: {details}")]
    ExpressionSyntax {
        expression: String,
        position: usize,
        details: String,
    },

    #[error("[ORCA-051] Reference '{reference}' not found")]
    ReferenceNotFound { reference: String },

    #[error("[ORCA-052] Cannot compare {left} {op} {right}")]
    TypeMismatch {
        left: String,
        op: String,
        right: String,
    },

    // ═══════════════════════════════════════════
    // INFRASTRUCTURE (090-099)
    // ═══════════════════════════════════════════
    #[error("[ORCA-090] Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("[ORCA-091] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[ORCA-092] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[ORCA-093] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[ORCA-094] Repository error: {reason}")]
    Repository { reason: String },
}

impl OrcaError {
    /// Machine-readable error code (e.g. "ORCA-020")
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "ORCA-001",
            Self::InvalidStep { .. } => "ORCA-002",
            Self::DuplicateNodeId { .. } => "ORCA-003",
            Self::InvalidNodeId { .. } => "ORCA-004",
            Self::InvalidSchema { .. } => "ORCA-005",
            Self::ValidationFailed { .. } => "ORCA-010",
            Self::TaskFailed { .. } => "ORCA-020",
            Self::RetryExhausted { .. } => "ORCA-021",
            Self::NodeFailed { .. } => "ORCA-022",
            Self::ExecutionTimeout { .. } => "ORCA-030",
            Self::TaskTimeout { .. } => "ORCA-031",
            Self::Cancelled { .. } => "ORCA-032",
            Self::ExecutionConcurrency { .. } => "ORCA-040",
            Self::HookRegistration { .. } => "ORCA-041",
            Self::ExecutionNotFound { .. } => "ORCA-042",
            Self::ExpressionSyntax { .. } => "ORCA-050",
            Self::ReferenceNotFound { .. } => "ORCA-051",
            Self::TypeMismatch { .. } => "ORCA-052",
            Self::ConfigError { .. } => "ORCA-090",
            Self::Io(_) => "ORCA-091",
            Self::Yaml(_) => "ORCA-092",
            Self::Json(_) => "ORCA-093",
            Self::Repository { .. } => "ORCA-094",
        }
    }

    /// Whether the orchestrator may retry the whole workflow after this error.
    ///
    /// Validation, cancellation and configuration misuse are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ParseError { .. }
                | Self::InvalidStep { .. }
                | Self::DuplicateNodeId { .. }
                | Self::InvalidNodeId { .. }
                | Self::InvalidSchema { .. }
                | Self::ValidationFailed { .. }
                | Self::Cancelled { .. }
                | Self::ExecutionConcurrency { .. }
                | Self::HookRegistration { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Structured details for programmatic handling
    pub fn details(&self) -> Value {
        match self {
            Self::ValidationFailed { issues } => json!({
                "issues": issues.iter().filter(|i| i.is_error()).collect::<Vec<_>>(),
            }),
            Self::RetryExhausted {
                node_id,
                attempts,
                last_error,
            } => json!({
                "node_id": node_id,
                "attempts": attempts,
                "last_error": last_error,
            }),
            Self::NodeFailed { node_id, reason } => json!({
                "node_id": node_id,
                "reason": reason,
            }),
            Self::ExecutionTimeout { timeout_ms } => json!({ "timeout_ms": timeout_ms }),
            _ => json!({ "message": self.to_string() }),
        }
    }
}

impl FixSuggestion for OrcaError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::ParseError { .. } => Some("Check YAML syntax: indentation and quoting"),
            Self::InvalidStep { .. } => {
                Some("Each step needs one of: task, sequence, parallel, if, loop, wait")
            }
            Self::DuplicateNodeId { .. } => Some("Use unique id: values across the workflow"),
            Self::InvalidNodeId { .. } => {
                Some("Node ids start with a letter or '_' and contain only [A-Za-z0-9_-]")
            }
            Self::InvalidSchema { .. } => Some("Use 'orca/workflow@0.1' as the schema version"),
            Self::ValidationFailed { .. } => Some("Run `orca validate` to list every issue"),
            Self::TaskFailed { .. } | Self::NodeFailed { .. } => {
                Some("Check the tool configuration and task parameters")
            }
            Self::RetryExhausted { .. } => Some("Increase retry_count or fix the failing task"),
            Self::ExecutionTimeout { .. } => Some("Raise the workflow timeout or split the workflow"),
            Self::TaskTimeout { .. } => Some("Raise the task timeout: value"),
            Self::Cancelled { .. } => None,
            Self::ExecutionConcurrency { .. } => {
                Some("Set max_concurrent_workflows >= 1 and use unique execution ids")
            }
            Self::HookRegistration { .. } => Some("Register callbacks with a non-empty execution id"),
            Self::ExecutionNotFound { .. } => Some("The execution may have already finished"),
            Self::ExpressionSyntax { .. } => {
                Some("Use comparisons like result.task.score > 0.5 joined by and/or")
            }
            Self::ReferenceNotFound { .. } => {
                Some("Reference an earlier node with result.<node_id> or a variable by name")
            }
            Self::TypeMismatch { .. } => Some("Compare values of the same type"),
            Self::ConfigError { .. } => Some("Check ~/.config/orca/config.toml"),
            Self::Io(_) => Some("Check file path and permissions"),
            Self::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            Self::Json(_) => Some("Check JSON syntax"),
            Self::Repository { .. } => Some("Check the result repository backend"),
        }
    }
}
