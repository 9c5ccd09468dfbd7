//! Core domain types for child tasks and their lifecycle states.

use serde::{Deserialize, Serialize};

/// A child unit of work decomposed from a parent task.
///
/// Tasks are immutable once fetched for a run; they are re-fetched only when
/// the run is rebuilt from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identity, e.g. a tracker issue id.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Free-text body. May reference sibling tasks ("depends on #42").
    #[serde(default)]
    pub body: String,
    /// Link back to the tracker issue, if any.
    #[serde(default)]
    pub source_url: Option<String>,
}

impl Task {
    /// Create a new task.
    pub fn new(id: &str, title: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            source_url: None,
        }
    }

    /// Attach the tracker URL.
    pub fn with_source_url(mut self, url: &str) -> Self {
        self.source_url = Some(url.to_string());
        self
    }
}

/// Lifecycle state of a workspace and the task(s) it represents.
///
/// `None` exists only in persisted records (a workspace that was provisioned
/// but whose worker never reported); the resolver normalizes it to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// No state reported yet.
    #[default]
    None,
    /// Waiting to be picked up by a worker.
    Pending,
    /// A worker is actively executing.
    InProgress,
    /// Work finished, awaiting review before merge.
    CodeReview,
    /// Completed successfully.
    Done,
    /// The prior attempt did not complete successfully.
    Failed,
}

impl TaskState {
    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Check if the task completed successfully.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Collapse record-only states into the four classification states.
    ///
    /// `None` means the workspace never reported, so the task has effectively
    /// not started; `CodeReview` is still active work in progress.
    pub fn normalized(&self) -> Self {
        match self {
            Self::None => Self::Pending,
            Self::CodeReview => Self::InProgress,
            other => *other,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::CodeReview => "code_review",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
