//! Orca Configuration Module
//!
//! Manages persistent engine configuration: concurrency, retry timings,
//! resource limits and the catalog of known tasks and tools.
//! Config is stored in `~/.config/orca/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`ORCA_MAX_CONCURRENT_WORKFLOWS`, ...)
//! 2. Config file (`~/.config/orca/config.toml` or `--config <path>`)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dsl::Catalog;
use crate::error::{OrcaError, Result};
use crate::limits::ResourceLimits;
use crate::orchestrator::OrchestratorConfig;
use crate::runtime::ExecutorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrcaConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    #[serde(default)]
    pub executor: ExecutorSection,

    #[serde(default)]
    pub limits: LimitsSection,

    #[serde(default)]
    pub catalog: CatalogSection,
}

/// `[orchestrator]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorSection {
    pub max_concurrent_workflows: Option<usize>,
    /// Whole-workflow timeout applied when a request sets none
    pub default_timeout_secs: Option<f64>,
    pub max_retries: Option<u32>,
    /// Base of the exponential backoff between workflow retries
    pub retry_backoff_base_ms: Option<u64>,
}

/// `[executor]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutorSection {
    pub task_retry_delay_ms: Option<u64>,
    pub wait_poll_interval_ms: Option<u64>,
    pub wait_timeout_secs: Option<f64>,
    pub default_max_iterations: Option<usize>,
}

/// `[limits]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LimitsSection {
    pub max_parallel_tasks: Option<usize>,
    pub max_workflow_depth: Option<usize>,
    pub max_loop_iterations: Option<usize>,
    pub max_task_retries: Option<u32>,
}

/// `[catalog]` section. Absent lists leave the catalog unrestricted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogSection {
    pub tasks: Option<Vec<String>>,
    pub tools: Option<Vec<String>>,
}

impl OrcaConfig {
    /// Get the config directory path
    ///
    /// Returns `~/.config/orca/` on Unix, `%APPDATA%/orca/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orca")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from the default path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| OrcaError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| OrcaError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Save configuration to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| OrcaError::ConfigError {
                    reason: format!("Failed to create config directory: {}", e),
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| OrcaError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| OrcaError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    /// Unparsable values are ignored.
    pub fn with_env(mut self) -> Self {
        if let Some(n) = env_parse("ORCA_MAX_CONCURRENT_WORKFLOWS") {
            self.orchestrator.max_concurrent_workflows = Some(n);
        }
        if let Some(n) = env_parse("ORCA_MAX_RETRIES") {
            self.orchestrator.max_retries = Some(n);
        }
        if let Some(secs) = env_parse("ORCA_WORKFLOW_TIMEOUT_SECS") {
            self.orchestrator.default_timeout_secs = Some(secs);
        }
        if let Some(ms) = env_parse("ORCA_TASK_RETRY_DELAY_MS") {
            self.executor.task_retry_delay_ms = Some(ms);
        }
        self
    }

    /// Build the runtime orchestrator configuration
    ///
    /// Fails with `ConfigError` when a seconds value is not a representable duration.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let defaults = OrchestratorConfig::default();
        let o = &self.orchestrator;

        Ok(OrchestratorConfig {
            max_concurrent_workflows: o
                .max_concurrent_workflows
                .unwrap_or(defaults.max_concurrent_workflows),
            default_timeout: secs(
                "orchestrator.default_timeout_secs",
                o.default_timeout_secs.filter(|s| *s > 0.0),
            )?
            .or(defaults.default_timeout),
            default_max_retries: o.max_retries.unwrap_or(defaults.default_max_retries),
            retry_backoff_base: o
                .retry_backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff_base),
            limits: self.resource_limits(),
            catalog: self.catalog(),
            executor: self.executor_config()?,
        })
    }

    pub fn executor_config(&self) -> Result<ExecutorConfig> {
        let defaults = ExecutorConfig::default();
        let e = &self.executor;

        Ok(ExecutorConfig {
            task_retry_delay: e
                .task_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.task_retry_delay),
            default_poll_interval: e
                .wait_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_poll_interval),
            default_wait_timeout: secs("executor.wait_timeout_secs", e.wait_timeout_secs)?
                .unwrap_or(defaults.default_wait_timeout),
            default_max_iterations: e
                .default_max_iterations
                .unwrap_or(defaults.default_max_iterations),
        })
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        let defaults = ResourceLimits::default();
        let l = &self.limits;

        ResourceLimits {
            max_parallel_tasks: l.max_parallel_tasks.unwrap_or(defaults.max_parallel_tasks),
            max_workflow_depth: l.max_workflow_depth.unwrap_or(defaults.max_workflow_depth),
            max_loop_iterations: l
                .max_loop_iterations
                .unwrap_or(defaults.max_loop_iterations),
            max_task_retries: l.max_task_retries.unwrap_or(defaults.max_task_retries),
            default_task_estimate: defaults.default_task_estimate,
        }
    }

    pub fn catalog(&self) -> Catalog {
        let mut catalog = Catalog::unrestricted();
        if let Some(tasks) = &self.catalog.tasks {
            catalog = catalog.with_tasks(tasks.iter().cloned());
        }
        if let Some(tools) = &self.catalog.tools {
            catalog = catalog.with_tools(tools.iter().cloned());
        }
        catalog
    }
}

/// Seconds → Duration; negative, NaN, infinite or oversized values are errors
fn secs(key: &str, value: Option<f64>) -> Result<Option<Duration>> {
    value
        .map(|s| {
            Duration::try_from_secs_f64(s).map_err(|e| OrcaError::ConfigError {
                reason: format!("{} = {} is not a valid duration: {}", key, s, e),
            })
        })
        .transpose()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}
