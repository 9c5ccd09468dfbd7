//! The `colony clean` command: tear down finished child workspaces.

use anyhow::{Context, Result};
use colony::metadata::MetadataStore;
use colony::task::TaskState;
use colony::workspace::{WorkspaceManager, WorkspaceOps};
use std::path::Path;
use tracing::warn;

/// Archive terminal child workspaces and remove their worktrees.
///
/// Only `done` workspaces are cleaned by default; `--all` includes `failed`
/// ones, which forfeits their retry workspaces (the archived failed record
/// still makes the next run re-create them from scratch).
pub async fn cmd_clean(project_dir: &Path, all: bool) -> Result<()> {
    let project_dir = project_dir
        .canonicalize()
        .context("Failed to resolve project directory")?;
    let store = MetadataStore::new(&project_dir);
    let manager = WorkspaceManager::new(project_dir.clone());

    let mut cleaned = 0usize;
    for mut record in store.active_records()? {
        // Never clean the top-level workspace.
        if record.parent.is_none() && record.path == project_dir {
            continue;
        }
        let eligible = match record.state {
            TaskState::Done => true,
            TaskState::Failed => all,
            _ => false,
        };
        if !eligible {
            continue;
        }

        // Only remove paths git still knows as worktrees.
        let worktree = manager.find(|wt| wt.path == record.path).await.ok().flatten();
        if worktree.is_some() {
            if let Err(e) = manager.remove(&record.path).await {
                warn!(branch = %record.branch_name, "worktree removal failed: {e:#}");
            }
        }
        store.archive(&mut record)?;
        println!("Archived {} ({})", record.branch_name, record.state);
        cleaned += 1;
    }

    if cleaned == 0 {
        println!("Nothing to clean.");
    } else {
        println!(
            "{} {} workspace(s) archived",
            console::style("Cleaned:").bold().green(),
            cleaned
        );
    }
    Ok(())
}
