use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "colony")]
#[command(version, about = "Epic orchestrator - run a parent task's children as an agent swarm")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a parent task, decomposing it into a swarm when it has children
    Run {
        /// Parent task identity (tracker issue id)
        parent_id: String,

        /// Force swarm mode without confirmation
        #[arg(long, conflicts_with = "single")]
        swarm: bool,

        /// Force single-task mode even when children exist
        #[arg(long, conflicts_with = "swarm")]
        single: bool,

        /// Leave finished child workspaces in place
        #[arg(long)]
        skip_cleanup: bool,

        /// Complexity hint override (low, standard, high); takes precedence
        /// over persisted epic metadata
        #[arg(long)]
        complexity: Option<String>,

        /// Concurrency ceiling for worker processes
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// Show workspace states for the current project
    Status,
    /// Archive finished child workspaces and remove their worktrees
    Clean {
        /// Also clean up failed workspaces
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("colony={default_level}"))),
        )
        .with_writer(std::io::stderr)
        .init();

    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    match &cli.command {
        Commands::Run {
            parent_id,
            swarm,
            single,
            skip_cleanup,
            complexity,
            max_parallel,
        } => {
            cmd::cmd_run(cmd::RunArgs {
                project_dir,
                parent_id: parent_id.clone(),
                force_swarm: *swarm,
                force_single: *single,
                skip_cleanup: *skip_cleanup,
                complexity: complexity.clone(),
                max_parallel: *max_parallel,
                assume_yes: cli.yes,
            })
            .await
        }
        Commands::Status => cmd::cmd_status(&project_dir),
        Commands::Clean { all } => cmd::cmd_clean(&project_dir, *all).await,
    }
}
