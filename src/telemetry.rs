//! Run-level result aggregation and fire-and-forget reporting.
//!
//! The collector is an explicit handle passed into the coordinator, never a
//! global. Reporting failures are caught here and logged at debug; they must
//! never fail or delay the run.

use crate::metadata::WorkspaceRecord;
use crate::task::TaskState;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of one swarm run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub parent_id: String,
    pub total_children: usize,
    /// Children in state `done` after the run.
    pub succeeded: usize,
    /// Children in state `failed` after the run.
    pub failed: usize,
    /// Wall-clock seconds from parent workspace creation to now.
    pub duration_secs: i64,
}

impl RunSummary {
    /// Whether every child finished successfully.
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total_children
    }
}

/// Compute the run summary from post-run child states.
pub fn summarize(
    parent: &WorkspaceRecord,
    states: &BTreeMap<String, TaskState>,
    now: DateTime<Utc>,
) -> RunSummary {
    let succeeded = states.values().filter(|s| s.is_done()).count();
    let failed = states
        .values()
        .filter(|s| matches!(s, TaskState::Failed))
        .count();

    RunSummary {
        parent_id: parent
            .task_ids
            .first()
            .cloned()
            .unwrap_or_else(|| parent.branch_name.clone()),
        total_children: states.len(),
        succeeded,
        failed,
        duration_secs: (now - parent.created_at).num_seconds().max(0),
    }
}

/// External telemetry collaborator.
#[async_trait]
pub trait TelemetryCollector: Send + Sync {
    async fn report(&self, summary: &RunSummary) -> Result<()>;
}

/// Posts summaries to an HTTP collector endpoint.
pub struct HttpCollector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCollector {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl TelemetryCollector for HttpCollector {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(summary)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Collector used when no endpoint is configured.
pub struct NoopCollector;

#[async_trait]
impl TelemetryCollector for NoopCollector {
    async fn report(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

/// Report a summary, swallowing any collector failure.
pub async fn report_summary(collector: &dyn TelemetryCollector, summary: &RunSummary) {
    if let Err(e) = collector.report(summary).await {
        debug!("telemetry report failed (ignored): {e:#}");
    }
}
