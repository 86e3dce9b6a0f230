//! Orca CLI - DSL workflow engine

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{Map, Value};

use orca::config::OrcaConfig;
use orca::error::{FixSuggestion, OrcaError};
use orca::orchestrator::{
    ExecutionMode, WorkflowExecutionResponse, WorkflowOrchestrator, WorkflowStatus,
};
use orca::runtime::EchoTaskExecutor;
use orca::workflow::WorkflowFile;

#[derive(Parser)]
#[command(name = "orca")]
#[command(about = "Orca - DSL workflow engine for agent task orchestration")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/orca/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file (tasks are echoed back, no tools are called)
    Run {
        /// Path to workflow YAML file
        file: PathBuf,

        /// Set a workflow parameter (value parsed as JSON, else a string)
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow file and list every issue
    Validate {
        /// Path to workflow YAML file
        file: PathBuf,
    },

    /// Show the execution plan without running anything
    Plan {
        /// Path to workflow YAML file
        file: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err("parameter name is empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file, params, json } => {
            run_workflow(cli.config.as_deref(), &file, params, json).await
        }
        Commands::Validate { file } => validate_workflow(cli.config.as_deref(), &file).await,
        Commands::Plan { file } => plan_workflow(cli.config.as_deref(), &file).await,
        Commands::Config => show_config(cli.config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.downcast_ref::<OrcaError>().and_then(|e| e.fix_suggestion()) {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<OrcaConfig, OrcaError> {
    let config = match path {
        Some(p) => OrcaConfig::load_from(p)?,
        None => OrcaConfig::load()?,
    };
    Ok(config.with_env())
}

fn orchestrator(config: &OrcaConfig) -> Result<WorkflowOrchestrator, OrcaError> {
    Ok(WorkflowOrchestrator::new(
        config.orchestrator_config()?,
        Arc::new(EchoTaskExecutor),
    ))
}

async fn run_workflow(
    config_path: Option<&Path>,
    file: &Path,
    params: Vec<(String, Value)>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let workflow = WorkflowFile::load(file)?;
    let overrides: Map<String, Value> = params.into_iter().collect();
    let request = workflow.to_request(ExecutionMode::Execute, overrides)?;

    if !json {
        println!(
            "{} Running workflow: {} ({} step(s))",
            "→".cyan(),
            workflow.id.cyan().bold(),
            workflow.steps.len()
        );
    }

    let response = orchestrator(&config)?.execute_workflow(request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    ensure_success(&response)
}

async fn validate_workflow(config_path: Option<&Path>, file: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let workflow = WorkflowFile::load(file)?;
    let request = workflow.to_request(ExecutionMode::ValidateOnly, Map::new())?;
    let response = orchestrator(&config)?.execute_workflow(request).await;

    if let Some(validation) = &response.validation_result {
        for issue in &validation.issues {
            let line = issue.to_string();
            let line = if issue.is_error() { line.red() } else { line.yellow() };
            println!("  {}", line);
            if let Some(suggestion) = &issue.suggestion {
                println!("    {} {}", "Fix:".yellow(), suggestion);
            }
        }
    }
    ensure_success(&response)?;

    println!("{} Workflow '{}' is valid", "✓".green(), file.display());
    println!("  Id: {}", workflow.id);
    println!("  Steps: {}", workflow.steps.len());
    Ok(())
}

async fn plan_workflow(config_path: Option<&Path>, file: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let workflow = WorkflowFile::load(file)?;
    let request = workflow.to_request(ExecutionMode::DryRun, Map::new())?;
    let response = orchestrator(&config)?.execute_workflow(request).await;
    ensure_success(&response)?;

    let plan = response.result.clone().unwrap_or(Value::Null);
    println!("{} Plan for '{}'", "→".cyan(), workflow.id.cyan().bold());
    println!("  Nodes: {}", plan["node_count"]);
    if let Some(stages) = plan["execution_order"].as_array() {
        for (i, stage) in stages.iter().enumerate() {
            let ids: Vec<&str> = stage
                .as_array()
                .map(|s| s.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            println!("  Stage {}: {}", i + 1, ids.join(", "));
        }
    }
    println!(
        "  Estimated duration: {}s",
        plan["estimated_duration"].as_f64().unwrap_or(0.0)
    );
    Ok(())
}

fn show_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(OrcaConfig::config_path);
    println!("{} {}", "#".dimmed(), path.display().to_string().dimmed());
    println!("{}", rendered);
    Ok(())
}

fn print_response(response: &WorkflowExecutionResponse) {
    let status = match response.status {
        WorkflowStatus::Completed => response.status.to_string().green().bold(),
        WorkflowStatus::Cancelled => response.status.to_string().yellow().bold(),
        _ => response.status.to_string().red().bold(),
    };
    println!(
        "{} {} in {:.2}s (retries: {})",
        "Status:".cyan().bold(),
        status,
        response.execution_time.as_secs_f64(),
        response.retries
    );
    if let Some(Value::Object(results)) = &response.result {
        println!("{}", "Results:".cyan().bold());
        let mut ids: Vec<&String> = results.keys().collect();
        ids.sort();
        for id in ids {
            println!("  {} {}", format!("{}:", id).bold(), results[id]);
        }
    }
}

fn ensure_success(response: &WorkflowExecutionResponse) -> anyhow::Result<()> {
    if response.success {
        return Ok(());
    }
    if let Some(validation) = response.validation_result.as_ref().filter(|v| !v.is_valid) {
        return Err(OrcaError::ValidationFailed {
            issues: validation.issues.clone(),
        }
        .into());
    }
    anyhow::bail!(
        "{}",
        response
            .error
            .clone()
            .unwrap_or_else(|| response.message.clone())
    )
}
