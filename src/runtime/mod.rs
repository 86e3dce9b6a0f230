//! Runtime Module - tree execution
//!
//! Contains the runtime execution components:
//! - `task`: the `TaskExecutor` seam every TASK node goes through
//! - `context`: per-run shared state (variables, results, node lifecycles)
//! - `executor`: the recursive interpreter over `DslNode` trees
//! - `result`: the immutable outcome of one run
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `dsl` module.

mod context;
mod executor;
mod result;
mod task;

pub use context::{DslExecutionContext, ExecutionState, NodeExecutionContext, StateCounts};
pub use executor::{DslExecutor, ExecutorConfig};
pub use result::{error_value, ExecutionMetadata, ExecutionResult, ExecutionStatus};
pub use task::{EchoTaskExecutor, FnTaskExecutor, TaskExecutor};
