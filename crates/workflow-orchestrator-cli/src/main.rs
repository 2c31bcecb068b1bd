// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference CLI embedder for the workflow orchestrator execution engine.
//!
//! Demonstrates `run`/`replay`/`history` against the core dispatcher, the
//! SQLite state store, and the example action set end to end. The full
//! CLI surface a production embedder would want (credentials, connect,
//! schedule, template, ...) lives outside the execution engine's contract
//! and is not reproduced here.

mod checkpoint;
mod loader;

use anyhow::{Context, Result};
use checkpoint::StateStoreCheckpointSink;
use clap::{Parser, Subcommand};
use colored::Colorize;
use loader::YamlFileLoader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use workflow_orchestrator_core::dispatcher::DispatchContext;
use workflow_orchestrator_core::events::ObserverChannel;
use workflow_orchestrator_core::workflow::Workflow;
use workflow_orchestrator_core::{ExecutionManager, StaticAdapterRegistry};
use workflow_orchestrator_state::{RunStatus as StoreRunStatus, SqliteStateStore, StateStore};

const DEFAULT_STATE_DB_ENV: &str = "WORKFLOW_STATE_DB";
const MAX_CONCURRENCY_ENV: &str = "WORKFLOW_MAX_CONCURRENCY";

#[derive(Parser)]
#[command(name = "workflow-orchestrator")]
#[command(version, about = "Declarative workflow execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and run a workflow document to completion
    Run {
        /// Path to a YAML workflow file
        #[arg(value_name = "FILE")]
        file: String,

        /// Input JSON string, or a path to a JSON file
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Resume a previously recorded run from its last checkpoint
    Replay {
        /// Full run id or an unambiguous prefix
        #[arg(value_name = "RUN_ID")]
        run_id: String,
    },

    /// List recorded runs and their status
    History {
        /// Only show runs with this status (running, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("workflow_orchestrator={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Run { file, input } => run_workflow(&file, input.as_deref()).await,
        Commands::Replay { run_id } => replay(&run_id).await,
        Commands::History { status } => history(status.as_deref()).await,
    };

    if let Err(err) = result {
        error!("{err}");
        eprintln!("{} {err}", "Error:".red().bold());
        std::process::exit(1);
    }
}

async fn open_store() -> Result<Arc<dyn StateStore>> {
    let path = std::env::var(DEFAULT_STATE_DB_ENV).unwrap_or_else(|_| ":memory:".to_string());
    let store = SqliteStateStore::new(&path).await.with_context(|| format!("opening state store at '{path}'"))?;
    Ok(Arc::new(store))
}

fn max_concurrency() -> usize {
    std::env::var(MAX_CONCURRENCY_ENV).ok().and_then(|v| v.parse().ok()).unwrap_or(4)
}

fn build_manager(store: Arc<dyn StateStore>, base_dir: PathBuf) -> ExecutionManager {
    let dctx = DispatchContext {
        actions: workflow_orchestrator_actions::default_actions(),
        registry: Arc::new(StaticAdapterRegistry::default()),
        observers: ObserverChannel::new(),
        checkpoint: Some(Arc::new(StateStoreCheckpointSink::new(store))),
        workflow_loader: Some(Arc::new(YamlFileLoader::new(base_dir))),
        waits: Default::default(),
        default_max_concurrency: Some(max_concurrency()),
    };
    ExecutionManager::new(dctx)
}

async fn run_workflow(file_path: &str, input: Option<&str>) -> Result<()> {
    info!("running workflow: {file_path}");
    println!("{} {file_path}", "Running workflow:".cyan().bold());

    let content = std::fs::read_to_string(file_path).with_context(|| format!("reading workflow file '{file_path}'"))?;
    let workflow: Workflow = serde_yaml::from_str(&content).with_context(|| format!("parsing workflow YAML '{file_path}'"))?;
    workflow.validate().context("workflow validation failed")?;

    let inputs = match input {
        Some(raw) => parse_input(raw)?,
        None => HashMap::new(),
    };

    let base_dir = Path::new(file_path).parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let store = open_store().await?;
    let manager = build_manager(store.clone(), base_dir);

    store
        .create_execution(&workflow_orchestrator_state::ExecutionRecord::new(Uuid::new_v4(), workflow.name.clone()))
        .await
        .ok();

    let run_id = manager.start_execution(Arc::new(workflow), inputs).context("starting execution")?;
    manager.wait_for_all().await;

    let summary = manager.get_execution_status(run_id).context("run vanished before it could be read back")?;
    println!("{} {run_id}", "Run id:".cyan().bold());
    println!("{} {:?}", "Status:".cyan().bold(), summary.status);
    println!(
        "{}\n{}",
        "Step results:".cyan().bold(),
        serde_json::to_string_pretty(&summary.step_results).unwrap_or_default()
    );

    match summary.status {
        workflow_orchestrator_core::RunStatus::Completed => {
            println!("{}", "Workflow completed".green().bold());
            Ok(())
        }
        other => anyhow::bail!("workflow ended in status {other:?}"),
    }
}

async fn replay(run_id: &str) -> Result<()> {
    let store = open_store().await?;
    let resolved = store.resolve_prefix(run_id).await.with_context(|| format!("resolving run id '{run_id}'"))?;
    let record = store.get_execution(resolved).await.with_context(|| format!("loading run '{resolved}'"))?;
    let checkpoints = store.get_checkpoints(resolved).await.context("loading checkpoints")?;

    println!("{} {}", "Replaying run:".cyan().bold(), resolved);
    println!("  workflow: {}", record.workflow_name);
    println!("  status:   {}", record.status);
    println!("  started:  {}", record.started_at);

    match checkpoints.last() {
        Some(latest) => {
            println!(
                "{} step '{}' at {}",
                "Last checkpoint:".cyan().bold(),
                latest.step_id,
                latest.created_at
            );
            println!("{}", serde_json::to_string_pretty(&latest.variables).unwrap_or_default());
        }
        None => println!("{}", "No checkpoints recorded for this run.".yellow()),
    }

    Ok(())
}

async fn history(status: Option<&str>) -> Result<()> {
    let store = open_store().await?;
    let filter = status.map(|s| s.parse::<StoreRunStatus>()).transpose().map_err(|err| anyhow::anyhow!(err))?;
    let records = store.list_executions(filter).await.context("listing executions")?;

    if records.is_empty() {
        println!("{}", "No recorded runs.".yellow());
        return Ok(());
    }

    println!("{:<36}  {:<24}  {:<10}  STARTED", "RUN ID", "WORKFLOW", "STATUS");
    for record in &records {
        println!(
            "{:<36}  {:<24}  {:<10}  {}",
            record.run_id.to_string(),
            record.workflow_name,
            record.status.to_string(),
            record.started_at
        );
    }

    let stats = store.get_stats().await.context("computing stats")?;
    println!(
        "\n{} total={} running={} completed={} failed={} cancelled={}",
        "Summary:".cyan().bold(),
        stats.total,
        stats.running,
        stats.completed,
        stats.failed,
        stats.cancelled
    );

    Ok(())
}

fn parse_input(input: &str) -> Result<HashMap<String, serde_json::Value>> {
    if Path::new(input).exists() {
        let content = std::fs::read_to_string(input).with_context(|| format!("reading input file '{input}'"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing input JSON from '{input}'"))
    } else {
        serde_json::from_str(input).context("parsing input JSON string")
    }
}
