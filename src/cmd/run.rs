//! The `colony run` command: decide swarm vs. single-task mode and drive
//! one orchestrator invocation.

use anyhow::{Context, Result};
use colony::config::{ColonyConfig, resolve_complexity};
use colony::coordinator::{SwarmCoordinator, SwarmOptions};
use colony::metadata::{MetadataStore, WorkspaceRecord};
use colony::task::Task;
use colony::telemetry::{HttpCollector, NoopCollector, RunSummary, TelemetryCollector};
use colony::tracker::{FaultTolerant, HttpTracker};
use colony::worker::{AgentWorker, WorkerConfig, WorkerLauncher};
use colony::workspace::{self, WorkspaceManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct RunArgs {
    pub project_dir: PathBuf,
    pub parent_id: String,
    pub force_swarm: bool,
    pub force_single: bool,
    pub skip_cleanup: bool,
    pub complexity: Option<String>,
    pub max_parallel: Option<usize>,
    pub assume_yes: bool,
}

pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let project_dir = args
        .project_dir
        .canonicalize()
        .context("Failed to resolve project directory")?;

    // All validation happens before any workspace mutation.
    if !WorkspaceManager::is_main_workspace(&project_dir).await? {
        anyhow::bail!(
            "colony run must be invoked from the main workspace, not a derived worktree. \
             Change to the top-level working copy and re-run"
        );
    }
    let config = ColonyConfig::load(&project_dir)?;
    if let Some(complexity) = &args.complexity {
        colony::config::validate_complexity(complexity)?;
    }

    let store = MetadataStore::new(&project_dir);
    store.ensure_dirs()?;
    let parent = load_or_create_parent(&store, &project_dir, &args.parent_id).await?;

    // Child fetch is fault-tolerant: a tracker outage degrades to an empty
    // list and therefore to single-task mode.
    let children = if !parent.child_issues.is_empty() {
        parent.child_issues.clone()
    } else if let Some(base_url) = &config.tracker.base_url {
        FaultTolerant::new(HttpTracker::new(base_url))
            .fetch_children(&args.parent_id)
            .await
    } else {
        Vec::new()
    };

    let swarm_mode = decide_mode(&args, children.len())?;
    if !swarm_mode {
        return run_single(&args, &config, &parent).await;
    }

    let complexity = resolve_complexity(
        args.complexity.as_deref(),
        parent.complexity.as_deref(),
        &config,
    )?;
    // Persist the effective hint so plain re-invocations keep it.
    if parent.complexity.as_deref() != Some(complexity.as_str()) {
        let mut parent = parent.clone();
        parent.complexity = Some(complexity.clone());
        store.save(&parent)?;
    }

    let worker_config = WorkerConfig {
        agent_cmd: config.worker.agent_cmd.clone(),
        skip_permissions: config.worker.skip_permissions,
        timeout: Duration::from_secs(config.worker.timeout_secs),
        skip_cleanup: args.skip_cleanup,
        complexity,
    };
    let collector: Arc<dyn TelemetryCollector> = match &config.telemetry.endpoint {
        Some(endpoint) => Arc::new(HttpCollector::new(endpoint)),
        None => Arc::new(NoopCollector),
    };
    let coordinator = SwarmCoordinator::new(
        store,
        Arc::new(WorkspaceManager::new(project_dir)),
        Arc::new(AgentWorker::new(worker_config)),
        collector,
        SwarmOptions {
            max_parallel: args.max_parallel.unwrap_or(config.swarm.max_parallel),
            skip_cleanup: args.skip_cleanup,
        },
    );

    println!(
        "{} swarm run for {} ({} children)",
        console::style("Starting").bold().cyan(),
        args.parent_id,
        children.len()
    );
    let summary = coordinator.run(&args.parent_id, children).await?;
    render_summary(&summary);
    Ok(())
}

/// Decide swarm vs. single-task mode from the force flags, the child count
/// and (interactively) the operator.
fn decide_mode(args: &RunArgs, child_count: usize) -> Result<bool> {
    if args.force_single {
        return Ok(false);
    }
    if args.force_swarm {
        if child_count == 0 {
            anyhow::bail!(
                "--swarm was given but task {} has no children (or the tracker \
                 is unreachable). Re-run without --swarm for single-task mode",
                args.parent_id
            );
        }
        return Ok(true);
    }
    if child_count == 0 {
        return Ok(false);
    }
    if args.assume_yes {
        return Ok(true);
    }

    let confirmed = dialoguer::Confirm::new()
        .with_prompt(format!(
            "Task {} has {} children. Run them as a swarm?",
            args.parent_id, child_count
        ))
        .default(true)
        .interact()
        .context("Failed to read confirmation")?;
    Ok(confirmed)
}

/// Load the parent workspace record, or construct one bound to the current
/// branch and the main working copy on the first invocation.
async fn load_or_create_parent(
    store: &MetadataStore,
    project_dir: &PathBuf,
    parent_id: &str,
) -> Result<WorkspaceRecord> {
    if let Some(record) = store.active_record(parent_id)? {
        return Ok(record);
    }

    let branch = workspace::current_branch(project_dir).await?;
    workspace::validate_branch_name(&branch)?;

    let record = WorkspaceRecord::new(&branch, project_dir.clone(), vec![parent_id.to_string()]);
    store.save(&record)?;
    Ok(record)
}

/// Single-task fallback: one worker on the parent workspace itself.
async fn run_single(args: &RunArgs, config: &ColonyConfig, parent: &WorkspaceRecord) -> Result<()> {
    println!(
        "{} single-task run for {}",
        console::style("Starting").bold().cyan(),
        args.parent_id
    );

    let complexity = resolve_complexity(
        args.complexity.as_deref(),
        parent.complexity.as_deref(),
        config,
    )?;
    let worker = AgentWorker::new(WorkerConfig {
        agent_cmd: config.worker.agent_cmd.clone(),
        skip_permissions: config.worker.skip_permissions,
        timeout: Duration::from_secs(config.worker.timeout_secs),
        skip_cleanup: args.skip_cleanup,
        complexity,
    });

    let task = fetch_parent_task(config, &args.parent_id).await;
    let outcome = worker.launch(&task, parent, parent.session_id.is_some()).await?;
    if outcome.state.is_done() {
        println!("{} task {}", console::style("Completed").bold().green(), args.parent_id);
        Ok(())
    } else {
        anyhow::bail!(
            "Task {} failed: {}",
            args.parent_id,
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

/// Best-effort parent task details; falls back to a bare task when the
/// tracker is unconfigured or unreachable.
async fn fetch_parent_task(config: &ColonyConfig, parent_id: &str) -> Task {
    if let Some(base_url) = &config.tracker.base_url {
        let details = FaultTolerant::new(HttpTracker::new(base_url))
            .fetch_task_details(&[parent_id.to_string()])
            .await;
        if let Some(task) = details.into_iter().next() {
            return task;
        }
    }
    Task::new(parent_id, parent_id, "")
}

fn render_summary(summary: &RunSummary) {
    println!();
    println!("{}", console::style("Swarm Run Summary").bold().cyan());
    println!("─────────────────────────");
    println!("Children:  {}", summary.total_children);
    println!(
        "Succeeded: {}",
        console::style(summary.succeeded).green()
    );
    if summary.failed > 0 {
        println!("Failed:    {}", console::style(summary.failed).red());
    } else {
        println!("Failed:    0");
    }
    println!("Duration:  {}s", summary.duration_secs);

    if summary.all_succeeded() {
        println!();
        println!(
            "{} all children merged into the parent branch",
            console::style("Done:").bold().green()
        );
    } else if summary.failed > 0 {
        println!();
        println!(
            "{} re-run `colony run {}` to retry failed children",
            console::style("Note:").bold().yellow(),
            summary.parent_id
        );
    }
}
