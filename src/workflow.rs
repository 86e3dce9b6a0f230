//! Workflow file structures
//!
//! A workflow file is YAML carrying a schema tag, an id and a step list:
//!
//! ```yaml
//! schema: orca/workflow@0.1
//! id: research
//! parameters:
//!   topic: rust
//! steps:
//!   - task: search
//!     tools: [web_search]
//!     parameters: { query: "${topic}" }
//!   - task: summarize
//!     parameters: { text: "${result.search}" }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{OrcaError, Result};
use crate::orchestrator::{ExecutionMode, WorkflowExecutionRequest};

pub const SCHEMA_VERSION: &str = "orca/workflow@0.1";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowFile {
    pub schema: String,
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default variables; overridden by caller parameters
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Whole-workflow timeout in seconds
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    pub steps: Vec<Value>,
}

impl WorkflowFile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let workflow: Self = serde_yaml::from_str(yaml)?;
        workflow.validate_schema()?;
        Ok(workflow)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn validate_schema(&self) -> Result<()> {
        if self.schema != SCHEMA_VERSION {
            return Err(OrcaError::InvalidSchema {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema.clone(),
            });
        }
        Ok(())
    }

    /// Build an orchestrator request; `overrides` win over file parameters
    pub fn to_request(
        &self,
        mode: ExecutionMode,
        overrides: Map<String, Value>,
    ) -> Result<WorkflowExecutionRequest> {
        let mut parameters = self.parameters.clone();
        parameters.extend(overrides);

        let mut request = WorkflowExecutionRequest::new(&self.id, self.steps.clone())
            .with_mode(mode)
            .with_parameters(parameters);
        if let Some(secs) = self.timeout {
            let timeout = Duration::try_from_secs_f64(secs).map_err(|e| OrcaError::InvalidStep {
                path: "timeout".to_string(),
                reason: e.to_string(),
            })?;
            request = request.with_timeout(timeout);
        }
        if let Some(retries) = self.max_retries {
            request = request.with_max_retries(retries);
        }
        Ok(request)
    }
}
