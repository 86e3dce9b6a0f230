//! Orchestrator Module - request-level coordination
//!
//! - `request`: request/response value objects and execution modes
//! - `orchestrator`: the concurrency-bounded parse → validate → execute pipeline

mod orchestrator;
mod request;

pub use orchestrator::{ExecutionCallback, ExecutionSnapshot, OrchestratorConfig, WorkflowOrchestrator};
pub use request::{ExecutionMode, WorkflowExecutionRequest, WorkflowExecutionResponse, WorkflowStatus};
