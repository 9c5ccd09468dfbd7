//! The `colony status` command: render workspace states from the store.

use anyhow::{Context, Result};
use colony::metadata::MetadataStore;
use colony::resolver;
use colony::task::TaskState;
use std::path::Path;

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let project_dir = project_dir
        .canonicalize()
        .context("Failed to resolve project directory")?;
    let store = MetadataStore::new(&project_dir);
    let records = store.active_records()?;

    if records.is_empty() {
        println!("No active workspaces.");
        return Ok(());
    }

    println!();
    println!("{}", console::style("Active Workspaces").bold().cyan());
    println!("─────────────────────────");
    for record in &records {
        let state = styled_state(record.state);
        println!(
            "{:<14} {:<40} {}",
            state,
            record.branch_name,
            record.task_ids.join(", ")
        );
    }

    // Parent records carry the child list; show per-child classification
    // including children whose workspaces are already archived.
    for record in &records {
        if record.child_issues.is_empty() {
            continue;
        }
        let parent_id = record
            .task_ids
            .first()
            .map(String::as_str)
            .unwrap_or(record.branch_name.as_str());
        println!();
        println!(
            "{} {}",
            console::style("Children of").bold().cyan(),
            parent_id
        );
        println!("─────────────────────────");
        for child in &record.child_issues {
            let state = resolver::resolve(&store, &child.id)?;
            println!("{:<14} {:<12} {}", styled_state(state), child.id, child.title);
        }
    }

    Ok(())
}

fn styled_state(state: TaskState) -> String {
    let label = state.to_string();
    match state {
        TaskState::Done => console::style(label).green().to_string(),
        TaskState::Failed => console::style(label).red().to_string(),
        TaskState::InProgress | TaskState::CodeReview => {
            console::style(label).yellow().to_string()
        }
        _ => label,
    }
}
