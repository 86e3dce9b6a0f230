//! Orca - DSL workflow engine for multi-task agent orchestration (v0.1)
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  dsl/       step lists → DslNode trees, static validation    │
//! │  workflow   YAML workflow files (orca/workflow@0.1)          │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  expr/          conditions and ${...} placeholders           │
//! │  runtime/       tree interpreter (DslExecutor, contexts)     │
//! │  orchestrator/  bounded pipeline, retries, cancel, callbacks │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store/     result repository contract (InMemoryRepository)  │
//! │  event/     lifecycle events (EventLog, EventEmitter)        │
//! │  config     ~/.config/orca/config.toml + ORCA_* overrides    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`dsl`] | Node model, parser, validator, task/tool catalog |
//! | [`expr`] | Condition evaluator, variable resolver, path lookup |
//! | [`runtime`] | Execution contexts, `TaskExecutor` seam, `DslExecutor` |
//! | [`orchestrator`] | Request/response, concurrency gate, workflow retries |
//! | [`store`] | `ResultRepository` and its in-memory implementation |
//! | [`event`] | Event log and emitter hooks |
//! | [`error`] | Error types with fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL - step lists → Rust types
// ═══════════════════════════════════════════════════════════════
pub mod dsl;
pub mod workflow;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - Execution logic
// ═══════════════════════════════════════════════════════════════
pub mod expr;
pub mod orchestrator;
pub mod runtime;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER - Storage, events, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;
pub mod event;
pub mod limits;
pub mod store;

// ═══════════════════════════════════════════════════════════════
// Re-exports for convenience
// ═══════════════════════════════════════════════════════════════

pub use config::OrcaConfig;
pub use dsl::{
    Catalog, DslNode, DslParser, DslValidator, NodeId, NodeKind, NodeType, ParseResult,
    Severity, ValidationIssue, ValidationResult,
};
pub use error::{FixSuggestion, OrcaError, Result};
pub use event::{Event, EventEmitter, EventKind, EventLog, NoopEmitter};
pub use expr::{ConditionEvaluator, VariableResolver};
pub use limits::ResourceLimits;
pub use orchestrator::{
    ExecutionMode, OrchestratorConfig, WorkflowExecutionRequest, WorkflowExecutionResponse,
    WorkflowOrchestrator, WorkflowStatus,
};
pub use runtime::{
    DslExecutionContext, DslExecutor, EchoTaskExecutor, ExecutionResult, ExecutionState,
    ExecutionStatus, FnTaskExecutor, TaskExecutor,
};
pub use store::{ExecutionRecord, InMemoryRepository, ResultRepository};
pub use workflow::WorkflowFile;
