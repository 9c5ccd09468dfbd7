//! Typed error hierarchy for the colony orchestrator.
//!
//! Only structural and validation failures get typed variants: they are the
//! ones that must abort a run before any workspace mutation. Transient
//! collaborator failures (tracker, telemetry) are degraded at the call site
//! and per-child failures are recorded as `failed` state, so neither appears
//! here.

use thiserror::Error;

/// Fatal errors that abort a swarm run.
#[derive(Debug, Error)]
pub enum ColonyError {
    #[error("Failed to read workspace record at {path}: {source}")]
    StoreReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write workspace record at {path}: {source}")]
    StoreWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed workspace record at {path}: {source}")]
    StoreCorrupt {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "An active workspace already exists for task {task_id} (branch {branch}). \
         Re-run after it finishes, or remove it with `colony clean`"
    )]
    DuplicateActiveWorkspace { task_id: String, branch: String },

    #[error(
        "No workspace record found for parent task {parent_id}. \
         Run `colony run {parent_id}` from the main workspace to create one"
    )]
    ParentWorkspaceMissing { parent_id: String },

    #[error(
        "Invalid branch name '{name}'. Branch names may only contain \
         alphanumerics, '/', '.', '_' and '-'"
    )]
    InvalidBranchName { name: String },

    #[error(
        "Invalid remote name '{name}'. Remote names may only contain \
         alphanumerics, '_' and '-'"
    )]
    InvalidRemoteName { name: String },

    #[error(
        "Invalid complexity hint '{value}'. Expected one of: low, standard, high"
    )]
    InvalidComplexity { value: String },

    #[error("git {command} failed: {stderr}")]
    GitCommandFailed { command: String, stderr: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
