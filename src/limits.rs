//! Resource limits and safety controls for workflow execution
//!
//! Provides configurable limits for:
//! - Parallel fan-out and tree depth
//! - Loop iterations
//! - Task retries
//! - Duration estimates used by dry runs

use std::time::Duration;

/// Iteration cap for a loop without max_iterations
pub const DEFAULT_LOOP_ITERATIONS: usize = 100;

/// Timeout for a wait without one
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval for a wait without one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed delay between task retry attempts
pub const DEFAULT_TASK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Static limits enforced by the validator
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Maximum number of children in a single parallel block
    pub max_parallel_tasks: usize,

    /// Maximum nesting depth of the node tree (root = 1)
    pub max_workflow_depth: usize,

    /// Upper bound accepted for a loop's max_iterations
    pub max_loop_iterations: usize,

    /// Retry counts above this produce a warning
    pub max_task_retries: u32,

    /// Duration assumed for a task without a timeout hint
    pub default_task_estimate: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 20,
            max_workflow_depth: 10,
            max_loop_iterations: 1000,
            max_task_retries: 5,
            default_task_estimate: Duration::from_secs(30),
        }
    }
}

impl ResourceLimits {
    /// Create limits suitable for testing (more restrictive)
    pub fn testing() -> Self {
        Self {
            max_parallel_tasks: 4,
            max_workflow_depth: 4,
            max_loop_iterations: 50,
            max_task_retries: 2,
            default_task_estimate: Duration::from_secs(1),
        }
    }

    /// Create limits suitable for production (balanced)
    pub fn production() -> Self {
        Self::default()
    }

    /// Create unlimited configuration (use with caution!)
    pub fn unlimited() -> Self {
        Self {
            max_parallel_tasks: usize::MAX,
            max_workflow_depth: usize::MAX,
            max_loop_iterations: usize::MAX,
            max_task_retries: u32::MAX,
            default_task_estimate: Duration::from_secs(30),
        }
    }

    pub fn with_max_parallel_tasks(mut self, n: usize) -> Self {
        self.max_parallel_tasks = n;
        self
    }

    pub fn with_max_workflow_depth(mut self, n: usize) -> Self {
        self.max_workflow_depth = n;
        self
    }

    pub fn with_max_loop_iterations(mut self, n: usize) -> Self {
        self.max_loop_iterations = n;
        self
    }
}
