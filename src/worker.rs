//! Per-child worker process supervision.
//!
//! Each outstanding child gets one autonomous agent process bound to its
//! workspace. The supervisor writes the task instructions to the agent's
//! stdin, waits for it (bounded by the per-child timeout), and maps the exit
//! into a terminal lifecycle state. The orchestrator shares nothing with the
//! worker except the workspace record on disk.

use crate::metadata::WorkspaceRecord;
use crate::task::{Task, TaskState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default timeout for one child worker (45 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 2700;

/// Default agent command.
const DEFAULT_AGENT_CMD: &str = "claude";

/// Configuration for launching child workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Agent CLI command.
    pub agent_cmd: String,
    /// Skip permission prompts in the agent.
    pub skip_permissions: bool,
    /// Maximum runtime for one child; on expiry the child is marked failed.
    pub timeout: Duration,
    /// Tell the worker to leave its workspace in place when finishing.
    pub skip_cleanup: bool,
    /// Complexity hint threaded into the worker instructions.
    pub complexity: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            agent_cmd: DEFAULT_AGENT_CMD.to_string(),
            skip_permissions: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            skip_cleanup: false,
            complexity: "standard".to_string(),
        }
    }
}

/// Terminal outcome of one worker run.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub state: TaskState,
    pub error: Option<String>,
}

impl WorkerOutcome {
    pub fn done() -> Self {
        Self {
            state: TaskState::Done,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            error: Some(error.into()),
        }
    }
}

/// State report an agent writes into its workspace before exiting.
///
/// The exit code alone cannot carry a failure reason, and an agent may
/// deliberately report `failed` while exiting cleanly. A terminal reported
/// state always wins over the exit status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    pub state: TaskState,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Path of the status report inside a workspace.
pub fn status_file(workspace: &Path) -> PathBuf {
    workspace.join(".colony").join("workspace.json")
}

fn read_reported_status(workspace: &Path) -> Option<WorkspaceStatus> {
    let path = status_file(workspace);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(path = %path.display(), "ignoring malformed status report: {e}");
            None
        }
    }
}

/// Seam between the coordinator and the worker process machinery.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Run one worker to completion for the given child workspace.
    ///
    /// `resume` is true only when the record's session id was persisted by a
    /// previous attempt; a fresh session id must not be resumed.
    async fn launch(
        &self,
        task: &Task,
        record: &WorkspaceRecord,
        resume: bool,
    ) -> Result<WorkerOutcome>;
}

/// Launches real agent processes.
pub struct AgentWorker {
    config: WorkerConfig,
}

impl AgentWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerLauncher for AgentWorker {
    async fn launch(
        &self,
        task: &Task,
        record: &WorkspaceRecord,
        resume: bool,
    ) -> Result<WorkerOutcome> {
        let prompt = build_worker_prompt(task, record, &self.config);

        let mut cmd = Command::new(&self.config.agent_cmd);
        cmd.arg("--print");
        if self.config.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        cmd.args(session_args(record.session_id.as_deref(), resume));

        // A reused workspace may still hold the previous attempt's report.
        let _ = std::fs::remove_file(status_file(&record.path));

        cmd.current_dir(&record.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        debug!(task = %task.id, workspace = %record.path.display(), "spawning worker");
        let mut child = cmd.spawn().context("Failed to spawn worker process")?;

        if let Some(mut stdin) = child.stdin.take() {
            // A worker that exits early closes the pipe before the
            // instructions are fully written; that shows up in its exit
            // status, not here.
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!(task = %task.id, "worker closed stdin early: {e}");
            }
            let _ = stdin.shutdown().await;
        }

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(status) => status.context("Failed to wait for worker process")?,
            Err(_) => {
                warn!(task = %task.id, "worker timed out, killing process");
                let _ = child.kill().await;
                return Ok(WorkerOutcome::failed(format!(
                    "Worker timed out after {:?}",
                    self.config.timeout
                )));
            }
        };

        if let Some(reported) = read_reported_status(&record.path)
            && reported.state.is_terminal()
        {
            return Ok(if reported.state.is_done() {
                WorkerOutcome::done()
            } else {
                WorkerOutcome::failed(
                    reported
                        .reason
                        .unwrap_or_else(|| "worker reported failure".to_string()),
                )
            });
        }

        if status.success() {
            Ok(WorkerOutcome::done())
        } else {
            Ok(WorkerOutcome::failed(format!(
                "Worker exited with code {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}

/// Session flags for the agent invocation: resume a session persisted by a
/// previous attempt, pin a fresh id otherwise.
fn session_args(session_id: Option<&str>, resume: bool) -> Vec<String> {
    match session_id {
        Some(id) if resume => vec!["--resume".to_string(), id.to_string()],
        Some(id) => vec!["--session-id".to_string(), id.to_string()],
        None => Vec::new(),
    }
}

/// Build the instruction block written to the worker's stdin.
pub fn build_worker_prompt(task: &Task, record: &WorkspaceRecord, config: &WorkerConfig) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are working on task {} in an isolated workspace.\n\n",
        task.id
    ));
    prompt.push_str(&format!("## Task: {}\n\n{}\n\n", task.title, task.body));
    if let Some(url) = &task.source_url {
        prompt.push_str(&format!("Tracker issue: {}\n\n", url));
    }
    prompt.push_str(&format!(
        "## Workspace\n\n\
         - Branch: {}\n\
         - All work happens in the current directory; do not touch other worktrees.\n\
         - Complexity: {}\n\n",
        record.branch_name, config.complexity
    ));
    prompt.push_str(
        "## When finished\n\n\
         - Commit all changes to the workspace branch.\n\
         - Update `.colony/workspace.json` state to `done` (or `failed` with the reason).\n",
    );
    if config.skip_cleanup {
        prompt.push_str("- Leave the workspace in place; cleanup is handled separately.\n");
    } else {
        prompt.push_str("- The orchestrator removes the workspace after the merge.\n");
    }

    prompt
}
