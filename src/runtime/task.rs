//! Task executor abstraction
//!
//! The engine never implements tools itself: every TASK node is handed to a
//! [`TaskExecutor`] with its task name, tool ids and resolved parameters.
//!
//! Implementations:
//! - [`FnTaskExecutor`]: wraps an async closure (tests, embedding)
//! - [`EchoTaskExecutor`]: echoes its inputs back (template smoke runs)

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

/// Executes named tasks with a set of tools
///
/// # Example
/// ```rust,ignore
/// let value = executor.execute_task("search", &["web".into()], &params).await?;
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute_task(
        &self,
        task_name: &str,
        tools: &[String],
        parameters: &Map<String, Value>,
    ) -> Result<Value>;
}

type TaskFn =
    dyn Fn(String, Vec<String>, Map<String, Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Adapts an async closure into a [`TaskExecutor`]
#[derive(Clone)]
pub struct FnTaskExecutor {
    f: Arc<TaskFn>,
}

impl FnTaskExecutor {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String, Vec<String>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |task, tools, params| Box::pin(f(task, tools, params))),
        }
    }
}

impl std::fmt::Debug for FnTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTaskExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskExecutor for FnTaskExecutor {
    async fn execute_task(
        &self,
        task_name: &str,
        tools: &[String],
        parameters: &Map<String, Value>,
    ) -> Result<Value> {
        (self.f)(task_name.to_string(), tools.to_vec(), parameters.clone()).await
    }
}

/// Returns `{task, tools, parameters}` for every call
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTaskExecutor;

#[async_trait]
impl TaskExecutor for EchoTaskExecutor {
    async fn execute_task(
        &self,
        task_name: &str,
        tools: &[String],
        parameters: &Map<String, Value>,
    ) -> Result<Value> {
        Ok(json!({
            "task": task_name,
            "tools": tools,
            "parameters": parameters,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_inputs() {
        let mut params = Map::new();
        params.insert("q".into(), json!("rust"));
        let out = EchoTaskExecutor
            .execute_task("search", &["web".to_string()], &params)
            .await
            .unwrap();
        assert_eq!(out, json!({"task": "search", "tools": ["web"], "parameters": {"q": "rust"}}));
    }

    #[tokio::test]
    async fn fn_executor_forwards_calls_and_errors() {
        let exec = FnTaskExecutor::new(|task, _tools, _params| async move {
            if task == "boom" {
                anyhow::bail!("exploded");
            }
            Ok(json!(task.len()))
        });
        let dyn_exec: Arc<dyn TaskExecutor> = Arc::new(exec);
        assert_eq!(
            dyn_exec.execute_task("abc", &[], &Map::new()).await.unwrap(),
            json!(3)
        );
        let err = dyn_exec.execute_task("boom", &[], &Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "exploded");
    }
}
