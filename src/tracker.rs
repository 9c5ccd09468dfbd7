//! Issue tracker collaborator contract.
//!
//! The coordinator never talks to the tracker directly; it goes through
//! [`FaultTolerant`], which converts every transport failure into an empty
//! list. An empty child list means the CLI falls back to single-task mode,
//! so the tracker can never take down a run.

use crate::task::Task;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

/// Narrow contract with the external issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Fetch the child tasks of a parent issue.
    async fn fetch_children(&self, parent_id: &str) -> Result<Vec<Task>>;

    /// Fetch full details for the given task identities.
    async fn fetch_task_details(&self, ids: &[String]) -> Result<Vec<Task>>;
}

/// HTTP tracker client.
pub struct HttpTracker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTracker {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IssueTracker for HttpTracker {
    async fn fetch_children(&self, parent_id: &str) -> Result<Vec<Task>> {
        let url = format!("{}/issues/{}/children", self.base_url, parent_id);
        let tasks = self
            .client
            .get(&url)
            .send()
            .await
            .context("Tracker request failed")?
            .error_for_status()
            .context("Tracker returned an error status")?
            .json()
            .await
            .context("Tracker returned malformed JSON")?;
        Ok(tasks)
    }

    async fn fetch_task_details(&self, ids: &[String]) -> Result<Vec<Task>> {
        let url = format!("{}/issues", self.base_url);
        let tasks = self
            .client
            .get(&url)
            .query(&[("ids", ids.join(","))])
            .send()
            .await
            .context("Tracker request failed")?
            .error_for_status()
            .context("Tracker returned an error status")?
            .json()
            .await
            .context("Tracker returned malformed JSON")?;
        Ok(tasks)
    }
}

/// Wrapper that degrades tracker failures to empty results.
pub struct FaultTolerant<T> {
    inner: T,
}

impl<T: IssueTracker> FaultTolerant<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Fetch children; any failure yields an empty list.
    pub async fn fetch_children(&self, parent_id: &str) -> Vec<Task> {
        match self.inner.fetch_children(parent_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(parent_id, "child fetch failed, treating as no children: {e:#}");
                Vec::new()
            }
        }
    }

    /// Fetch details; any failure yields an empty list.
    pub async fn fetch_task_details(&self, ids: &[String]) -> Vec<Task> {
        match self.inner.fetch_task_details(ids).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("task detail fetch failed, treating as empty: {e:#}");
                Vec::new()
            }
        }
    }
}
