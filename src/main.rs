use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};

use siteflow::config::Config;
use siteflow::core::WorkflowStatus;
use siteflow::orchestration::{
    builtin_registry, ExecutionSummary, Orchestrator, OrchestratorEvent, WorkflowPlan,
};
use siteflow::Result;

/// Siteflow - DAG task orchestrator for construction-assistant tools
#[derive(Parser, Debug)]
#[command(name = "siteflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    SITEFLOW_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.siteflow/siteflow.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute a workflow plan (JSON) with the built-in tools
    Run {
        /// Path to the plan file
        plan: PathBuf,

        /// Override the configured concurrency cap
        #[arg(long, short = 'j')]
        max_concurrent: Option<usize>,

        /// Print the execution summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a plan for unknown labels, bad timeouts and cycles
    Validate {
        /// Path to the plan file
        plan: PathBuf,
    },

    /// List the built-in tools
    Tools,

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("siteflow: {}", e);
            std::process::exit(2);
        }
    };
    siteflow::log::init_with_debug(cli.debug || config.debug);

    let result = match cli.command {
        Command::Run {
            plan,
            max_concurrent,
            json,
        } => run_plan(&plan, config, max_concurrent, json),
        Command::Validate { plan } => run_validate(&plan),
        Command::Tools => run_tools(),
        Command::Config => run_config(&config),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("siteflow: {}", e);
            if siteflow::log::is_debug() {
                if let Some(path) = siteflow::log::log_path() {
                    eprintln!("siteflow: debug log at {}", path.display());
                }
            }
            std::process::exit(2);
        }
    }
}

/// Execute a plan. Returns whether the workflow completed.
fn run_plan(path: &Path, mut config: Config, max_concurrent: Option<usize>, json: bool) -> Result<bool> {
    let plan = WorkflowPlan::load(path)?;
    if let Some(cap) = max_concurrent {
        config.max_concurrent_tasks = cap;
    }
    info!(plan = %plan.name, steps = plan.steps.len(), cap = config.max_concurrent_tasks, "run command");

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::from_config(&config, Arc::new(builtin_registry()))?
            .with_events(tx);
        let (workflow_id, labels) = orchestrator.create_from_plan(&plan).await?;

        let names: std::collections::HashMap<_, _> =
            labels.iter().map(|(label, id)| (*id, label.clone())).collect();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !json {
                    print_event(&event, &names);
                }
            }
        });

        let summary = orchestrator.execute_workflow(&workflow_id).await;
        drop(orchestrator);
        let _ = printer.await;
        summary
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(summary.is_success())
}

fn print_event(
    event: &OrchestratorEvent,
    names: &std::collections::HashMap<siteflow::core::TaskId, String>,
) {
    let name = |id: &siteflow::core::TaskId| names.get(id).cloned().unwrap_or_default();
    match event {
        OrchestratorEvent::TaskStarted { task_id, attempt, .. } => {
            println!("  start    {} (attempt {})", name(task_id), attempt)
        }
        OrchestratorEvent::TaskCompleted { task_id, progress, .. } => {
            println!("  done     {} [{:.0}%]", name(task_id), progress)
        }
        OrchestratorEvent::TaskRetrying { task_id, error, .. } => {
            println!("  retry    {}: {}", name(task_id), error)
        }
        OrchestratorEvent::TaskFailed { task_id, error, .. } => {
            println!("  failed   {}: {}", name(task_id), error)
        }
        OrchestratorEvent::TaskSkipped { task_id, .. } => println!("  skipped  {}", name(task_id)),
        OrchestratorEvent::WorkflowStarted { .. } | OrchestratorEvent::WorkflowFinished { .. } => {}
    }
}

fn print_summary(summary: &ExecutionSummary) {
    println!(
        "Workflow {}: {} ({:.0}%) in {:.2}s",
        summary.workflow_id.short(),
        summary.status,
        summary.progress,
        summary.execution_time
    );
    println!(
        "  {} total, {} completed, {} failed, {} skipped, {} cancelled",
        summary.tasks_total,
        summary.tasks_completed,
        summary.tasks_failed,
        summary.tasks_skipped,
        summary.tasks_cancelled
    );
    if summary.status != WorkflowStatus::Completed {
        for failure in &summary.failures {
            println!("  {}", failure.to_error());
        }
    }
}

fn run_validate(path: &Path) -> Result<bool> {
    let plan = WorkflowPlan::load(path)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let orchestrator = Orchestrator::new(1, Arc::new(builtin_registry()))?;
        let (workflow_id, _) = orchestrator.create_from_plan(&plan).await?;
        orchestrator.get_workflow(&workflow_id).await?.validate_dag()
    })?;

    let tools = builtin_registry();
    for step in plan.steps.iter().filter(|s| !tools.contains(&s.tool)) {
        println!("note: step {} uses tool {} which is not built in", step.label, step.tool);
    }
    println!("Plan {} is valid ({} steps)", plan.name, plan.steps.len());
    Ok(true)
}

fn run_tools() -> Result<bool> {
    for name in builtin_registry().list_names() {
        println!("{}", name);
    }
    Ok(true)
}

fn run_config(config: &Config) -> Result<bool> {
    match Config::config_path() {
        Ok(path) => println!("# {}", path.display()),
        Err(_) => println!("# no home directory, using defaults"),
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(true)
}
