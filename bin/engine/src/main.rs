//! Command-line runner for autoflow workflows.

mod config;
mod error;
mod pg_store;

use autoflow_ai::AiDispatcher;
use autoflow_core::WorkflowRunId;
use autoflow_sandbox::SandboxRunner;
use autoflow_workflow::{
    ActionRegistry, ExecutionScheduler, InMemoryRunStore, InMemoryWorkflowSource,
    NodeExecutorRegistry, RunExecutionRecord, RunStatus, RunStore, Workflow, WorkflowEngine,
    ValidationResult, WorkflowSource, validate,
};
use clap::{Parser, Subcommand};
use crate::config::AppConfig;
use crate::error::CliError;
use crate::pg_store::PgRunStore;
use rootcause::prelude::*;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "autoflow-engine")]
#[command(about = "Validate and run autoflow workflows")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Check a workflow file without running it
    Validate {
        #[arg(help = "Path to workflow JSON file")]
        workflow: PathBuf,
    },

    /// Run a workflow file and print the run record
    Run {
        #[arg(help = "Path to workflow JSON file")]
        workflow: PathBuf,

        #[arg(long, help = "Run input as inline JSON", conflicts_with = "input_file")]
        input: Option<String>,

        #[arg(long, help = "Path to a JSON file holding the run input")]
        input_file: Option<PathBuf>,
    },

    /// Print a stored run record
    Show {
        #[arg(help = "Run id (run_...)")]
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(report) => {
            eprintln!("error: {report}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode, Report<CliError>> {
    let config = AppConfig::load(cli.config.as_deref()).context(CliError::Config)?;
    tracing::debug!(?config.engine, "loaded configuration");

    match cli.command {
        Command::Validate { workflow } => {
            let result = validate_file(&workflow)?;
            Ok(if result.is_valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Run {
            workflow,
            input,
            input_file,
        } => {
            let input = read_input(input, input_file.as_deref())?;
            run_file(&config, &workflow, input).await
        }
        Command::Show { run_id } => show_run(&config, &run_id).await,
    }
}

fn read_workflow(path: &Path) -> Result<Workflow, Report<CliError>> {
    let text = std::fs::read_to_string(path).context(CliError::ReadFile {
        path: path.to_path_buf(),
    })?;
    serde_json::from_str(&text).map_err(|e| {
        CliError::ParseWorkflow {
            path: path.to_path_buf(),
            details: e.to_string(),
        }
        .into()
    })
}

fn read_input(inline: Option<String>, file: Option<&Path>) -> Result<JsonValue, Report<CliError>> {
    let text = match (inline, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path).context(CliError::ReadFile {
            path: path.to_path_buf(),
        })?,
        (None, None) => return Ok(JsonValue::Object(serde_json::Map::new())),
    };
    serde_json::from_str(&text).map_err(|e| {
        CliError::InvalidInput {
            details: e.to_string(),
        }
        .into()
    })
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Report<CliError>> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Setup {
        details: e.to_string(),
    })?;
    println!("{text}");
    Ok(())
}

fn validate_file(path: &Path) -> Result<ValidationResult, Report<CliError>> {
    let workflow = read_workflow(path)?;
    let result = validate(&workflow.nodes, &workflow.edges);
    if result.is_valid {
        println!(
            "{}: valid ({} nodes, {} edges)",
            workflow.name,
            workflow.nodes.len(),
            workflow.edges.len()
        );
    } else {
        println!("{}: invalid", workflow.name);
        for error in &result.errors {
            println!("  - {error}");
        }
    }
    Ok(result)
}

async fn run_store(config: &AppConfig) -> Result<Arc<dyn RunStore>, Report<CliError>> {
    match &config.database_url {
        Some(url) => {
            let store = PgRunStore::connect(url).await.context(CliError::Database)?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("no database_url configured; run records are kept in memory");
            Ok(Arc::new(InMemoryRunStore::new()))
        }
    }
}

fn build_scheduler(config: &AppConfig) -> Result<ExecutionScheduler, Report<CliError>> {
    let actions = ActionRegistry::with_builtins().map_err(|e| CliError::Setup {
        details: e.to_string(),
    })?;
    let ai = AiDispatcher::from_config(config.ai.clone()).map_err(|e| CliError::Setup {
        details: e.to_string(),
    })?;
    tracing::info!(providers = ?ai.configured_providers(), "AI dispatcher ready");
    let code = SandboxRunner::new(config.sandbox.clone());
    let registry = NodeExecutorRegistry::new(actions, Arc::new(code), Arc::new(ai));
    Ok(ExecutionScheduler::new(Arc::new(registry), config.engine))
}

async fn run_file(
    config: &AppConfig,
    path: &Path,
    input: JsonValue,
) -> Result<ExitCode, Report<CliError>> {
    let workflow = read_workflow(path)?;
    let workflow_id = workflow.id;

    let workflows = Arc::new(InMemoryWorkflowSource::new());
    workflows.insert(workflow).await;
    let engine = WorkflowEngine::new(
        workflows as Arc<dyn WorkflowSource>,
        run_store(config).await?,
        build_scheduler(config)?,
    );

    let handle = engine
        .start_run(workflow_id, input)
        .await
        .context(CliError::Engine)?;
    tracing::info!(run_id = %handle.run_id, "run accepted");

    let record = tokio::select! {
        record = engine.wait_for_run(handle.run_id) => record,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(run_id = %handle.run_id, "interrupted; cancelling run");
            engine.cancel_run(handle.run_id).await;
            engine.wait_for_run(handle.run_id).await
        }
    }
    .context(CliError::Engine)?;

    print_json(&record)?;
    Ok(exit_code(&record))
}

fn exit_code(record: &RunExecutionRecord) -> ExitCode {
    if record.status == RunStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn show_run(config: &AppConfig, run_id: &str) -> Result<ExitCode, Report<CliError>> {
    let run_id = WorkflowRunId::from_str(run_id).map_err(|_| CliError::InvalidRunId {
        run_id: run_id.to_string(),
    })?;
    let url = config
        .database_url
        .as_deref()
        .ok_or(CliError::DatabaseRequired)?;
    let store = PgRunStore::connect(url).await.context(CliError::Database)?;
    let record = store.get_run(run_id).await.context(CliError::Engine)?;
    print_json(&record)?;
    Ok(exit_code(&record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn input_flags_conflict() {
        let result = Cli::try_parse_from([
            "autoflow-engine",
            "run",
            "wf.json",
            "--input",
            "{}",
            "--input-file",
            "input.json",
        ]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from(["autoflow-engine", "run", "wf.json", "--input", "{\"a\":1}"])
            .expect("parse");
        assert!(matches!(cli.command, Command::Run { input: Some(_), .. }));
    }

    #[test]
    fn input_defaults_to_empty_object() {
        assert_eq!(read_input(None, None).expect("input"), serde_json::json!({}));
        assert_eq!(
            read_input(Some("[1, 2]".to_string()), None).expect("input"),
            serde_json::json!([1, 2])
        );
        assert!(read_input(Some("{nope".to_string()), None).is_err());
    }

    #[test]
    fn validate_reports_invalid_workflow() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("temp file");
        write!(
            file,
            r#"{{
                "name": "broken",
                "nodes": [
                    {{ "id": "a", "config": {{ "kind": "action", "service": "http", "action": "get" }} }}
                ],
                "edges": []
            }}"#
        )
        .expect("write");

        let result = validate_file(file.path()).expect("validate");
        assert!(!result.is_valid);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.to_string().contains("no trigger"))
        );
    }

    #[test]
    fn unreadable_workflow_is_an_error() {
        let err = read_workflow(Path::new("/nonexistent/wf.json")).expect_err("missing");
        assert!(err.to_string().contains("failed to read"));
    }
}
