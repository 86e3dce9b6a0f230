//! Workflow Orchestrator - session-level coordinator
//!
//! Pipeline per request: Parse → Validate → (mode) →
//! - VALIDATE_ONLY: report findings
//! - DRY_RUN: report the plan, run nothing
//! - EXECUTE: build a context, run the executor, retry the whole workflow
//!   with exponential backoff
//!
//! A semaphore bounds concurrent executions; acquisition blocks. Active
//! executions live in an in-memory registry for status and cancel lookups
//! and leave it on every exit path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dsl::{Catalog, DslNode, DslParser, DslValidator, ValidationResult};
use crate::error::{OrcaError, Result};
use crate::event::{EventEmitter, EventKind, NoopEmitter};
use crate::limits::ResourceLimits;
use crate::runtime::{DslExecutionContext, DslExecutor, ExecutorConfig, StateCounts, TaskExecutor};
use crate::store::{ExecutionRecord, ResultRepository};

use super::request::{
    ExecutionMode, WorkflowExecutionRequest, WorkflowExecutionResponse, WorkflowStatus,
};

/// Called once with the terminal response of an execution
pub type ExecutionCallback =
    Arc<dyn Fn(&WorkflowExecutionResponse) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Size of the concurrency gate; 0 rejects every execution
    pub max_concurrent_workflows: usize,
    /// Whole-workflow timeout when a request sets none
    pub default_timeout: Option<Duration>,
    /// Whole-workflow retries when a request sets none
    pub default_max_retries: u32,
    /// Backoff before retry n is `base × 2^n`
    pub retry_backoff_base: Duration,
    pub limits: ResourceLimits,
    pub catalog: Catalog,
    pub executor: ExecutorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            default_timeout: None,
            default_max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            limits: ResourceLimits::default(),
            catalog: Catalog::unrestricted(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Registry entry of a running execution
struct ActiveExecution {
    workflow_id: Arc<str>,
    status: WorkflowStatus,
    started_at: DateTime<Utc>,
    attempt: u32,
    cancel_token: CancellationToken,
    context: Option<Arc<DslExecutionContext>>,
}

/// Point-in-time view of an active execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    /// 0 for the first attempt
    pub attempt: u32,
    pub cancel_requested: bool,
    pub nodes: StateCounts,
}

/// Registry membership; dropping it removes the entry
struct Registration<'a> {
    active: &'a DashMap<Arc<str>, ActiveExecution>,
    id: Arc<str>,
    token: CancellationToken,
}

impl Registration<'_> {
    fn update(&self, f: impl FnOnce(&mut ActiveExecution)) {
        if let Some(mut entry) = self.active.get_mut(&self.id) {
            f(entry.value_mut());
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

pub struct WorkflowOrchestrator {
    config: OrchestratorConfig,
    parser: DslParser,
    validator: DslValidator,
    executor: DslExecutor,
    gate: Semaphore,
    active: DashMap<Arc<str>, ActiveExecution>,
    callbacks: DashMap<Arc<str>, Vec<ExecutionCallback>>,
    repository: Option<Arc<dyn ResultRepository>>,
    emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("config", &self.config)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl WorkflowOrchestrator {
    pub fn new(config: OrchestratorConfig, task_executor: Arc<dyn TaskExecutor>) -> Self {
        let parser = DslParser::new().with_catalog(config.catalog.clone());
        let validator = DslValidator::new(config.limits.clone(), config.catalog.clone());
        let executor = DslExecutor::new(task_executor).with_config(config.executor.clone());
        Self {
            gate: Semaphore::new(config.max_concurrent_workflows.min(Semaphore::MAX_PERMITS)),
            config,
            parser,
            validator,
            executor,
            active: DashMap::new(),
            callbacks: DashMap::new(),
            repository: None,
            emitter: Arc::new(NoopEmitter),
        }
    }

    /// Persist every terminal response
    pub fn with_repository(mut self, repository: Arc<dyn ResultRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Receive workflow and node lifecycle events
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.executor = self.executor.with_emitter(Arc::clone(&emitter));
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one request to a terminal response. Never fails: every error
    /// becomes a response with `success = false`.
    #[instrument(skip_all, fields(workflow_id = %request.workflow_id, mode = ?request.mode))]
    pub async fn execute_workflow(
        &self,
        request: WorkflowExecutionRequest,
    ) -> WorkflowExecutionResponse {
        let started = Instant::now();
        let execution_id = request
            .execution_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.config.max_concurrent_workflows == 0 {
            let err = OrcaError::ExecutionConcurrency {
                reason: "max_concurrent_workflows is 0".to_string(),
            };
            let response = WorkflowExecutionResponse::failure(
                &execution_id,
                WorkflowStatus::Failed,
                &err,
                started.elapsed(),
            );
            return self.finish(&request.workflow_id, response).await;
        }

        // A duplicate id belongs to someone else's run: no callbacks, no record
        let Some(registration) = self.register(&execution_id, &request.workflow_id) else {
            let err = OrcaError::ExecutionConcurrency {
                reason: format!("execution '{}' is already active", execution_id),
            };
            warn!(%execution_id, "duplicate execution id rejected");
            return WorkflowExecutionResponse::failure(
                &execution_id,
                WorkflowStatus::Failed,
                &err,
                started.elapsed(),
            );
        };

        let response = self.run(&request, &registration, started).await;
        drop(registration);
        self.finish(&request.workflow_id, response).await
    }

    fn register(&self, execution_id: &str, workflow_id: &str) -> Option<Registration<'_>> {
        let id: Arc<str> = Arc::from(execution_id);
        let token = CancellationToken::new();
        match self.active.entry(Arc::clone(&id)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(ActiveExecution {
                    workflow_id: Arc::from(workflow_id),
                    status: WorkflowStatus::Pending,
                    started_at: Utc::now(),
                    attempt: 0,
                    cancel_token: token.clone(),
                    context: None,
                });
                Some(Registration {
                    active: &self.active,
                    id,
                    token,
                })
            }
        }
    }

    async fn run(
        &self,
        request: &WorkflowExecutionRequest,
        registration: &Registration<'_>,
        started: Instant,
    ) -> WorkflowExecutionResponse {
        let id = &*registration.id;

        // Scoped permit: released on every return below
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let err = OrcaError::ExecutionConcurrency {
                    reason: "concurrency gate closed".to_string(),
                };
                return WorkflowExecutionResponse::failure(id, WorkflowStatus::Failed, &err, started.elapsed());
            }
        };
        if registration.token.is_cancelled() {
            return self.cancelled(id, None, 0, started);
        }
        registration.update(|a| a.status = WorkflowStatus::Running);

        let root = match self.parser.parse(&request.steps).into_result() {
            Ok(root) => root,
            Err(e) => {
                warn!(execution_id = id, error = %e, "workflow parse failed");
                return WorkflowExecutionResponse::failure(id, WorkflowStatus::Failed, &e, started.elapsed());
            }
        };

        let validation = self.validator.validate(&root);
        debug!(
            execution_id = id,
            errors = validation.error_count(),
            issues = validation.issues.len(),
            "workflow validated"
        );

        if request.mode == ExecutionMode::ValidateOnly {
            return self.validation_report(id, validation, started);
        }
        if !validation.is_valid {
            let err = OrcaError::ValidationFailed {
                issues: validation.issues.clone(),
            };
            warn!(execution_id = id, errors = validation.error_count(), "workflow rejected by validation");
            return WorkflowExecutionResponse::failure(id, WorkflowStatus::Failed, &err, started.elapsed())
                .with_validation(validation);
        }

        match request.mode {
            ExecutionMode::DryRun => {
                let plan = json!({
                    "node_count": root.node_count(),
                    "depth": root.depth(),
                    "execution_order": &validation.execution_order,
                    "dependency_graph": &validation.dependency_graph,
                    "estimated_duration": validation.estimated_duration.as_secs_f64(),
                });
                WorkflowExecutionResponse::success(id, "Dry run: execution plan only", Some(plan), started.elapsed())
                    .with_validation(validation)
            }
            ExecutionMode::ValidateOnly | ExecutionMode::Execute => {
                self.execute_with_retries(request, &root, registration, validation, started)
                    .await
            }
        }
    }

    fn validation_report(
        &self,
        id: &str,
        validation: ValidationResult,
        started: Instant,
    ) -> WorkflowExecutionResponse {
        if validation.is_valid {
            let message = format!("Workflow is valid ({} issue(s))", validation.issues.len());
            WorkflowExecutionResponse::success(id, message, None, started.elapsed())
                .with_validation(validation)
        } else {
            let err = OrcaError::ValidationFailed {
                issues: validation.issues.clone(),
            };
            WorkflowExecutionResponse::failure(id, WorkflowStatus::Failed, &err, started.elapsed())
                .with_message("Workflow is invalid")
                .with_validation(validation)
        }
    }

    async fn execute_with_retries(
        &self,
        request: &WorkflowExecutionRequest,
        root: &DslNode,
        registration: &Registration<'_>,
        validation: ValidationResult,
        started: Instant,
    ) -> WorkflowExecutionResponse {
        let id = &*registration.id;
        let max_retries = request.max_retries.unwrap_or(self.config.default_max_retries);
        let timeout = request.timeout.or(self.config.default_timeout);

        self.emitter.emit(EventKind::WorkflowStarted {
            workflow_id: Arc::from(request.workflow_id.as_str()),
            execution_id: Arc::clone(&registration.id),
            node_count: root.node_count(),
        });

        let mut retries = 0;
        loop {
            // Child token: a timeout cancels one attempt, cancel_workflow cancels all
            let context = Arc::new(
                DslExecutionContext::new(
                    request.workflow_id.as_str(),
                    Arc::clone(&registration.id),
                    request.parameters.clone(),
                )
                .with_cancel_token(registration.token.child_token()),
            );
            registration.update(|a| {
                a.attempt = retries;
                a.context = Some(Arc::clone(&context));
            });

            let error = match self.executor.execute_workflow(root, &context, timeout).await {
                Ok(result) if result.is_cancelled() => {
                    return self.cancelled(id, Some(Value::Object(result.result)), retries, started);
                }
                Ok(result) => {
                    info!(execution_id = id, retries, nodes = result.metadata.completed_nodes, "workflow completed");
                    return WorkflowExecutionResponse::success(
                        id,
                        "Workflow completed",
                        Some(Value::Object(result.result)),
                        started.elapsed(),
                    )
                    .with_validation(validation)
                    .with_retries(retries);
                }
                Err(e) => e,
            };

            let partial = Value::Object(context.results_snapshot());
            if registration.token.is_cancelled() || error.is_cancelled() {
                return self.cancelled(id, Some(partial), retries, started);
            }
            if !error.is_retryable() || retries >= max_retries {
                let status = match error {
                    OrcaError::ExecutionTimeout { .. } => WorkflowStatus::TimedOut,
                    _ => WorkflowStatus::Failed,
                };
                warn!(execution_id = id, retries, error = %error, "workflow failed");
                return WorkflowExecutionResponse::failure(id, status, &error, started.elapsed())
                    .with_result(partial)
                    .with_validation(validation)
                    .with_retries(retries);
            }

            let backoff = self.backoff(retries);
            retries += 1;
            warn!(execution_id = id, attempt = retries, backoff_ms = backoff.as_millis() as u64, error = %error, "retrying workflow");
            self.emitter.emit(EventKind::WorkflowRetrying {
                execution_id: Arc::clone(&registration.id),
                attempt: retries,
                backoff_ms: backoff.as_millis() as u64,
                error: error.to_string(),
            });
            tokio::select! {
                _ = registration.token.cancelled() => {
                    return self.cancelled(id, Some(partial), retries, started);
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// `base × 2^retry`, retry counted from 0
    fn backoff(&self, retry: u32) -> Duration {
        self.config
            .retry_backoff_base
            .saturating_mul(1u32 << retry.min(16))
    }

    fn cancelled(
        &self,
        id: &str,
        partial: Option<Value>,
        retries: u32,
        started: Instant,
    ) -> WorkflowExecutionResponse {
        info!(execution_id = id, "workflow cancelled");
        let err = OrcaError::Cancelled {
            execution_id: id.to_string(),
        };
        let response = WorkflowExecutionResponse::failure(id, WorkflowStatus::Cancelled, &err, started.elapsed())
            .with_message("Workflow cancelled")
            .with_retries(retries);
        match partial {
            Some(result) => response.with_result(result),
            None => response,
        }
    }

    /// Persist, emit and fire callbacks for a terminal response
    async fn finish(&self, workflow_id: &str, response: WorkflowExecutionResponse) -> WorkflowExecutionResponse {
        let execution_id: Arc<str> = Arc::from(response.execution_id.as_str());

        if let Some(repository) = &self.repository {
            let record = ExecutionRecord::from_response(workflow_id, &response);
            if let Err(e) = repository.save(record).await {
                warn!(%execution_id, error = %e, "failed to persist execution record");
            }
        }

        let event = match response.status {
            WorkflowStatus::Completed => EventKind::WorkflowCompleted {
                execution_id: Arc::clone(&execution_id),
                duration_ms: response.execution_time.as_millis() as u64,
            },
            WorkflowStatus::Cancelled => EventKind::WorkflowCancelled {
                execution_id: Arc::clone(&execution_id),
            },
            _ => EventKind::WorkflowFailed {
                execution_id: Arc::clone(&execution_id),
                error: response.error.clone().unwrap_or_default(),
                error_code: response.error_code.clone().unwrap_or_default(),
            },
        };
        self.emitter.emit(event);

        if let Some((_, callbacks)) = self.callbacks.remove(&execution_id) {
            for callback in callbacks {
                match catch_unwind(AssertUnwindSafe(|| callback(&response))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%execution_id, error = %e, "execution callback failed"),
                    Err(_) => warn!(%execution_id, "execution callback panicked"),
                }
            }
        }

        response
    }

    /// Request cancellation of an active execution
    ///
    /// Returns false when the id is not active (finished or unknown).
    /// Repeated calls are harmless.
    pub fn cancel_workflow(&self, execution_id: &str) -> bool {
        let Some(entry) = self.active.get(execution_id) else {
            debug!(execution_id, "cancel requested for inactive execution");
            return false;
        };
        entry.cancel_token.cancel();
        let marked = entry
            .context
            .as_ref()
            .map(|ctx| ctx.cancel_running())
            .unwrap_or(0);
        info!(execution_id, marked, "workflow cancellation requested");
        true
    }

    pub fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        let entry = self
            .active
            .get(execution_id)
            .ok_or_else(|| OrcaError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })?;
        Ok(ExecutionSnapshot {
            execution_id: execution_id.to_string(),
            workflow_id: entry.workflow_id.to_string(),
            status: entry.status,
            started_at: entry.started_at,
            attempt: entry.attempt,
            cancel_requested: entry.cancel_token.is_cancelled(),
            nodes: entry
                .context
                .as_ref()
                .map(|ctx| ctx.state_counts())
                .unwrap_or_default(),
        })
    }

    /// Ids of executions currently registered, sorted
    pub fn active_executions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.iter().map(|e| e.key().to_string()).collect();
        ids.sort();
        ids
    }

    /// Register a callback for an execution id (may precede the execution)
    ///
    /// Callbacks fire once, after the execution reaches a terminal state.
    /// Their errors and panics are logged and swallowed.
    pub fn register_execution_callback<F>(&self, execution_id: &str, callback: F) -> Result<()>
    where
        F: Fn(&WorkflowExecutionResponse) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if execution_id.trim().is_empty() {
            return Err(OrcaError::HookRegistration {
                execution_id: execution_id.to_string(),
                reason: "execution id is empty".to_string(),
            });
        }
        self.callbacks
            .entry(Arc::from(execution_id))
            .or_default()
            .push(Arc::new(callback));
        debug!(execution_id, "execution callback registered");
        Ok(())
    }
}
