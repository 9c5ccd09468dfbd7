//! Task state classification against the metadata store.
//!
//! Resume policy lives here: `done` children are always skipped, `failed`
//! children are always retried, and anything without a terminal record is
//! treated as not yet started.

use crate::errors::ColonyError;
use crate::metadata::MetadataStore;
use crate::task::{Task, TaskState};

/// Classify a task by consulting the store.
///
/// Order matters: an active workspace record wins over an archived one, and
/// a task with no record at all is `pending`.
pub fn resolve(store: &MetadataStore, task_id: &str) -> Result<TaskState, ColonyError> {
    if let Some(record) = store.active_record(task_id)? {
        return Ok(record.state.normalized());
    }
    if let Some(record) = store.archived_record(task_id)? {
        return Ok(record.state.normalized());
    }
    Ok(TaskState::Pending)
}

/// Filter the children down to the ones that still need a worker.
///
/// A child is outstanding unless it resolved to `done`. In particular a
/// `failed` child is outstanding: failure means the prior attempt did not
/// complete, so it is eligible for re-creation.
pub fn outstanding(store: &MetadataStore, children: &[Task]) -> Result<Vec<Task>, ColonyError> {
    let mut out = Vec::new();
    for child in children {
        if !resolve(store, &child.id)?.is_done() {
            out.push(child.clone());
        }
    }
    Ok(out)
}
