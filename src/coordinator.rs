//! Swarm run orchestration.
//!
//! One invocation drives a parent's outstanding children through
//! `Initializing → Filtering → Provisioning → Awaiting → Finalizing →
//! Completed`. Every transition re-derives its inputs from the metadata
//! store, so a crashed or re-invoked run resumes from persisted state
//! instead of in-memory flags: done children are skipped, failed children
//! are retried, and active workspaces are re-attached rather than
//! duplicated.

use crate::errors::ColonyError;
use crate::graph::{self, DependencyMap};
use crate::metadata::{MetadataStore, ParentLink, WorkspaceRecord};
use crate::resolver;
use crate::task::{Task, TaskState};
use crate::telemetry::{self, RunSummary, TelemetryCollector};
use crate::worker::WorkerLauncher;
use crate::workspace::{WorkspaceOps, slugify};
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Phases of one swarm run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmPhase {
    Initializing,
    Filtering,
    Provisioning,
    Awaiting,
    Finalizing,
    Completed,
}

impl std::fmt::Display for SwarmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Filtering => "filtering",
            Self::Provisioning => "provisioning",
            Self::Awaiting => "awaiting",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// Per-run options, resolved by the CLI layer.
#[derive(Debug, Clone)]
pub struct SwarmOptions {
    /// Concurrency ceiling for worker processes.
    pub max_parallel: usize,
    /// Leave finished child workspaces in place instead of archiving them.
    pub skip_cleanup: bool,
}

impl Default for SwarmOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            skip_cleanup: false,
        }
    }
}

/// Orchestrates one swarm run for a parent task.
pub struct SwarmCoordinator {
    store: MetadataStore,
    workspaces: Arc<dyn WorkspaceOps>,
    launcher: Arc<dyn WorkerLauncher>,
    collector: Arc<dyn TelemetryCollector>,
    options: SwarmOptions,
}

impl SwarmCoordinator {
    pub fn new(
        store: MetadataStore,
        workspaces: Arc<dyn WorkspaceOps>,
        launcher: Arc<dyn WorkerLauncher>,
        collector: Arc<dyn TelemetryCollector>,
        options: SwarmOptions,
    ) -> Self {
        Self {
            store,
            workspaces,
            launcher,
            collector,
            options,
        }
    }

    /// Run the swarm for `parent_id`.
    ///
    /// `fetched_children` is used only when the parent record carries no
    /// persisted child list (a fresh run); on resume the persisted list wins
    /// so that the child set is stable across invocations.
    pub async fn run(&self, parent_id: &str, fetched_children: Vec<Task>) -> Result<RunSummary> {
        debug!(phase = %SwarmPhase::Initializing, parent_id);
        let mut parent = self.store.active_record(parent_id)?.ok_or_else(|| {
            ColonyError::ParentWorkspaceMissing {
                parent_id: parent_id.to_string(),
            }
        })?;

        let children = if parent.child_issues.is_empty() {
            fetched_children
        } else {
            parent.child_issues.clone()
        };

        // A missing map defaults to "no dependencies" and detection failures
        // degrade the same way inside build_dependency_map.
        let map: DependencyMap = match parent.dependency_map.clone() {
            Some(map) => map,
            None => graph::build_dependency_map(&children),
        };

        // Persist both so resume does not re-derive them.
        parent.child_issues = children.clone();
        parent.dependency_map = Some(map.clone());
        self.store.save(&parent)?;

        debug!(phase = %SwarmPhase::Filtering);
        let outstanding = resolver::outstanding(&self.store, &children)?;
        let ordered = graph::launch_order(&outstanding, &map);
        info!(
            outstanding = ordered.len(),
            total = children.len(),
            "filtered children"
        );

        debug!(phase = %SwarmPhase::Provisioning);
        let mut provisioned: Vec<(Task, WorkspaceRecord)> = Vec::new();
        for child in &ordered {
            match self.acquire_workspace(&parent, child).await {
                Ok(record) => provisioned.push((child.clone(), record)),
                Err(e) => {
                    warn!(task = %child.id, "provisioning failed, isolating child: {e:#}");
                    self.record_provisioning_failure(child, &parent, &e)?;
                }
            }
        }

        debug!(phase = %SwarmPhase::Awaiting, workers = provisioned.len());
        self.await_workers(provisioned).await?;

        // Finalizing always runs, even when nothing was outstanding: a parent
        // that crashed before merging recovers on the next invocation.
        debug!(phase = %SwarmPhase::Finalizing);
        self.finalize(&mut parent, &children).await?;

        debug!(phase = %SwarmPhase::Completed);
        let mut states = BTreeMap::new();
        for child in &children {
            states.insert(child.id.clone(), resolver::resolve(&self.store, &child.id)?);
        }
        let summary = telemetry::summarize(&parent, &states, Utc::now());
        telemetry::report_summary(self.collector.as_ref(), &summary).await;
        Ok(summary)
    }

    /// Acquire the workspace for one child, creating it only if no active
    /// record exists. The record write is what makes the workspace active,
    /// so a concurrent or repeated invocation cannot double-provision.
    async fn acquire_workspace(
        &self,
        parent: &WorkspaceRecord,
        child: &Task,
    ) -> Result<WorkspaceRecord> {
        if let Some(mut existing) = self.store.active_record(&child.id)? {
            if !existing.path.as_os_str().is_empty() {
                debug!(task = %child.id, branch = %existing.branch_name, "reusing active workspace");
                return Ok(existing);
            }
            // A provisioning failure left the record without a working copy;
            // this retry binds it to a freshly created one.
            let path = self.workspaces.create(&existing.branch_name).await?;
            existing.path = path;
            existing.state = TaskState::Pending;
            existing.last_error = None;
            self.store.save(&existing)?;
            return Ok(existing);
        }

        let branch = child_branch_name(parent, child);
        let path = self.workspaces.create(&branch).await?;

        let record = WorkspaceRecord::new(&branch, path, vec![child.id.clone()]).with_parent(
            ParentLink {
                task_id: parent.task_ids.first().cloned().unwrap_or_default(),
                branch_name: parent.branch_name.clone(),
                path: parent.path.clone(),
            },
        );
        self.store.save(&record)?;
        Ok(record)
    }

    /// Record a per-child provisioning failure without aborting siblings.
    fn record_provisioning_failure(
        &self,
        child: &Task,
        parent: &WorkspaceRecord,
        error: &anyhow::Error,
    ) -> Result<(), ColonyError> {
        let mut record = WorkspaceRecord::new(
            &child_branch_name(parent, child),
            PathBuf::new(),
            vec![child.id.clone()],
        )
        .with_parent(ParentLink {
            task_id: parent.task_ids.first().cloned().unwrap_or_default(),
            branch_name: parent.branch_name.clone(),
            path: parent.path.clone(),
        });
        record.state = TaskState::Failed;
        record.last_error = Some(format!("{error:#}"));
        self.store.save(&record)
    }

    /// Launch one worker per provisioned child, bounded by the concurrency
    /// ceiling, and persist each terminal outcome as it lands.
    async fn await_workers(&self, provisioned: Vec<(Task, WorkspaceRecord)>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));
        let mut handles = Vec::new();

        for (task, mut record) in provisioned {
            // Resume only sessions persisted by a previous attempt; a fresh
            // id is pinned for the first launch, never resumed.
            let resume = record.session_id.is_some();
            if record.session_id.is_none() {
                record.session_id = Some(Uuid::new_v4().to_string());
            }
            record.state = TaskState::InProgress;
            record.last_error = None;
            self.store.save(&record)?;

            let launcher = Arc::clone(&self.launcher);
            let store = self.store.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let mut record = record;
                match launcher.launch(&task, &record, resume).await {
                    Ok(outcome) => {
                        record.state = outcome.state;
                        record.last_error = outcome.error;
                    }
                    Err(e) => {
                        record.state = TaskState::Failed;
                        record.last_error = Some(format!("{e:#}"));
                    }
                }
                if let Err(e) = store.save(&record) {
                    warn!(task = %task.id, "failed to persist worker outcome: {e}");
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker supervision task panicked: {e}");
            }
        }
        Ok(())
    }

    /// Merge finished child branches into the parent branch and tear down
    /// their workspaces. Merge conflicts and infrastructure failures isolate
    /// to the child.
    async fn finalize(&self, parent: &mut WorkspaceRecord, children: &[Task]) -> Result<()> {
        for child in children {
            let Some(mut record) = self.store.active_record(&child.id)? else {
                continue;
            };
            if !record.state.is_done() {
                continue;
            }

            let merged = match self
                .workspaces
                .merge_branch(&record.branch_name, &parent.path)
                .await
            {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(task = %child.id, "merge failed: {e:#}");
                    record.last_error = Some(format!("{e:#}"));
                    false
                }
            };
            if !merged {
                record.state = TaskState::Failed;
                record.last_error.get_or_insert_with(|| {
                    format!("Merge conflict with {}", parent.branch_name)
                });
                self.store.save(&record)?;
                continue;
            }

            if !self.options.skip_cleanup {
                if !record.path.as_os_str().is_empty()
                    && let Err(e) = self.workspaces.remove(&record.path).await
                {
                    warn!(task = %child.id, "workspace cleanup failed: {e:#}");
                }
                self.store.archive(&mut record)?;
            }
        }

        let mut all_done = !children.is_empty();
        for child in children {
            if !resolver::resolve(&self.store, &child.id)?.is_done() {
                all_done = false;
            }
        }
        parent.state = if all_done {
            TaskState::Done
        } else {
            TaskState::InProgress
        };
        self.store.save(parent)?;
        Ok(())
    }
}

/// Deterministic branch name for a child workspace.
fn child_branch_name(parent: &WorkspaceRecord, child: &Task) -> String {
    let parent_id = parent
        .task_ids
        .first()
        .map(String::as_str)
        .unwrap_or("epic");
    format!("colony/{}-{}", slugify(parent_id, 20), slugify(&child.id, 30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NoopCollector;
    use crate::worker::{WorkerLauncher, WorkerOutcome};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// In-memory workspace primitive: no git, just call accounting.
    #[derive(Default)]
    struct StubWorkspaces {
        create_calls: Mutex<Vec<String>>,
        merge_calls: Mutex<Vec<String>>,
        remove_calls: Mutex<Vec<PathBuf>>,
        fail_create_for: Option<String>,
        conflict_branches: Vec<String>,
    }

    #[async_trait]
    impl WorkspaceOps for StubWorkspaces {
        async fn create(&self, branch: &str) -> Result<PathBuf> {
            if let Some(fail) = &self.fail_create_for
                && branch.contains(fail.as_str())
            {
                anyhow::bail!("disk full");
            }
            self.create_calls.lock().unwrap().push(branch.to_string());
            Ok(PathBuf::from("/ws").join(slugify(branch, 60)))
        }

        async fn remove(&self, path: &Path) -> Result<()> {
            self.remove_calls.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        async fn merge_branch(&self, branch: &str, _parent_workspace: &Path) -> Result<bool> {
            self.merge_calls.lock().unwrap().push(branch.to_string());
            Ok(!self.conflict_branches.iter().any(|b| branch == b))
        }
    }

    /// Launcher that returns scripted outcomes per task id.
    struct StubLauncher {
        outcomes: HashMap<String, TaskState>,
        launched: Mutex<Vec<String>>,
        resume_flags: Mutex<Vec<(String, bool)>>,
    }

    impl StubLauncher {
        fn new(outcomes: &[(&str, TaskState)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(id, s)| (id.to_string(), *s))
                    .collect(),
                launched: Mutex::new(Vec::new()),
                resume_flags: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WorkerLauncher for StubLauncher {
        async fn launch(
            &self,
            task: &Task,
            _record: &WorkspaceRecord,
            resume: bool,
        ) -> Result<WorkerOutcome> {
            self.launched.lock().unwrap().push(task.id.clone());
            self.resume_flags
                .lock()
                .unwrap()
                .push((task.id.clone(), resume));
            match self.outcomes.get(&task.id).copied() {
                Some(TaskState::Done) | None => Ok(WorkerOutcome::done()),
                Some(_) => Ok(WorkerOutcome::failed("scripted failure")),
            }
        }
    }

    fn store_with_parent(root: &Path, children: &[Task]) -> MetadataStore {
        let store = MetadataStore::new(root);
        let mut parent = WorkspaceRecord::new(
            "main",
            root.to_path_buf(),
            vec!["EPIC-1".to_string()],
        );
        parent.state = TaskState::InProgress;
        parent.child_issues = children.to_vec();
        store.save(&parent).unwrap();
        store
    }

    fn coordinator(
        store: &MetadataStore,
        workspaces: StubWorkspaces,
        launcher: StubLauncher,
    ) -> (SwarmCoordinator, Arc<StubWorkspaces>, Arc<StubLauncher>) {
        let workspaces = Arc::new(workspaces);
        let launcher = Arc::new(launcher);
        let coordinator = SwarmCoordinator::new(
            store.clone(),
            Arc::clone(&workspaces) as Arc<dyn WorkspaceOps>,
            Arc::clone(&launcher) as Arc<dyn WorkerLauncher>,
            Arc::new(NoopCollector),
            SwarmOptions::default(),
        );
        (coordinator, workspaces, launcher)
    }

    fn children_abc() -> Vec<Task> {
        vec![
            Task::new("A", "Task A", ""),
            Task::new("B", "Task B", ""),
            Task::new("C", "Task C", ""),
        ]
    }

    // =========================================
    // Resume scenario
    // =========================================

    #[tokio::test]
    async fn test_resume_skips_done_retries_failed_runs_new() {
        let dir = tempdir().unwrap();
        let children = children_abc();
        let store = store_with_parent(dir.path(), &children);

        // A finished in a previous run and was cleaned up.
        let mut done = WorkspaceRecord::new(
            "colony/epic-1-a",
            PathBuf::from("/ws/a"),
            vec!["A".to_string()],
        );
        done.state = TaskState::Done;
        store.archive(&mut done).unwrap();

        // B failed in a previous run; its workspace is still around.
        let mut failed = WorkspaceRecord::new(
            "colony/epic-1-b",
            PathBuf::from("/ws/b"),
            vec!["B".to_string()],
        );
        failed.state = TaskState::Failed;
        store.save(&failed).unwrap();

        let (coordinator, workspaces, launcher) = coordinator(
            &store,
            StubWorkspaces::default(),
            StubLauncher::new(&[("B", TaskState::Done), ("C", TaskState::Failed)]),
        );

        let summary = coordinator.run("EPIC-1", Vec::new()).await.unwrap();

        // Only B and C were launched; A was skipped.
        let launched = launcher.launched.lock().unwrap().clone();
        assert_eq!(launched, vec!["B", "C"]);
        // B reused its existing workspace; only C needed a new one.
        assert_eq!(workspaces.create_calls.lock().unwrap().len(), 1);

        assert_eq!(summary.total_children, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
    }

    // =========================================
    // Idempotency
    // =========================================

    #[tokio::test]
    async fn test_no_duplicate_workspace_for_active_record() {
        let dir = tempdir().unwrap();
        let children = vec![Task::new("A", "Task A", "")];
        let store = store_with_parent(dir.path(), &children);

        // A is already provisioned and mid-flight.
        let mut active = WorkspaceRecord::new(
            "colony/epic-1-a",
            PathBuf::from("/ws/a"),
            vec!["A".to_string()],
        );
        active.state = TaskState::InProgress;
        active.session_id = Some("sess-1".to_string());
        store.save(&active).unwrap();

        let (coordinator, workspaces, launcher) = coordinator(
            &store,
            StubWorkspaces::default(),
            StubLauncher::new(&[("A", TaskState::Done)]),
        );

        coordinator.run("EPIC-1", Vec::new()).await.unwrap();

        // No second workspace was created; the run re-attached.
        assert!(workspaces.create_calls.lock().unwrap().is_empty());
        assert_eq!(launcher.launched.lock().unwrap().clone(), vec!["A"]);

        // The persisted session handle survived the re-attach.
        let archived = store.archived_record("A").unwrap().unwrap();
        assert_eq!(archived.session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn test_all_done_respin_still_finalizes() {
        let dir = tempdir().unwrap();
        let children = vec![Task::new("A", "Task A", ""), Task::new("B", "Task B", "")];
        let store = store_with_parent(dir.path(), &children);

        // Both children finished but the previous run crashed before merging.
        for id in ["A", "B"] {
            let mut rec = WorkspaceRecord::new(
                &format!("colony/epic-1-{}", id.to_lowercase()),
                PathBuf::from("/ws").join(id.to_lowercase()),
                vec![id.to_string()],
            );
            rec.state = TaskState::Done;
            store.save(&rec).unwrap();
        }

        let (coordinator, workspaces, launcher) =
            coordinator(&store, StubWorkspaces::default(), StubLauncher::new(&[]));

        let summary = coordinator.run("EPIC-1", Vec::new()).await.unwrap();

        // Nothing was outstanding, but reconciliation still ran.
        assert!(launcher.launched.lock().unwrap().is_empty());
        assert_eq!(workspaces.merge_calls.lock().unwrap().len(), 2);
        assert_eq!(summary.succeeded, 2);

        let parent = store.active_record("EPIC-1").unwrap().unwrap();
        assert_eq!(parent.state, TaskState::Done);
    }

    // =========================================
    // Failure isolation
    // =========================================

    #[tokio::test]
    async fn test_provisioning_failure_isolated_per_child() {
        let dir = tempdir().unwrap();
        let children = vec![Task::new("A", "Task A", ""), Task::new("B", "Task B", "")];
        let store = store_with_parent(dir.path(), &children);

        let workspaces = StubWorkspaces {
            fail_create_for: Some("-b".to_string()),
            ..StubWorkspaces::default()
        };
        let (coordinator, _workspaces, launcher) = coordinator(
            &store,
            workspaces,
            StubLauncher::new(&[("A", TaskState::Done)]),
        );

        let summary = coordinator.run("EPIC-1", Vec::new()).await.unwrap();

        // A still ran to completion despite B's provisioning failure.
        assert_eq!(launcher.launched.lock().unwrap().clone(), vec!["A"]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let failed = store.active_record("B").unwrap().unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert!(failed.last_error.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_provisioning_failure_retried_with_new_workspace() {
        let dir = tempdir().unwrap();
        let children = vec![Task::new("A", "Task A", "")];
        let store = store_with_parent(dir.path(), &children);

        // First run: provisioning fails, leaving a pathless failed record.
        let failing = StubWorkspaces {
            fail_create_for: Some("-a".to_string()),
            ..StubWorkspaces::default()
        };
        let (first_run, _workspaces, _launcher) =
            coordinator(&store, failing, StubLauncher::new(&[]));
        first_run.run("EPIC-1", Vec::new()).await.unwrap();

        let failed = store.active_record("A").unwrap().unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert!(failed.path.as_os_str().is_empty());

        // Retry with healthy infrastructure: the workspace is re-created
        // instead of reusing the pathless record, and the child completes.
        let (retry, workspaces, launcher) = coordinator(
            &store,
            StubWorkspaces::default(),
            StubLauncher::new(&[("A", TaskState::Done)]),
        );
        let summary = retry.run("EPIC-1", Vec::new()).await.unwrap();

        assert_eq!(
            workspaces.create_calls.lock().unwrap().clone(),
            vec!["colony/epic-1-a".to_string()]
        );
        assert_eq!(launcher.launched.lock().unwrap().clone(), vec!["A"]);
        assert_eq!(summary.succeeded, 1);

        let archived = store.archived_record("A").unwrap().unwrap();
        assert!(!archived.path.as_os_str().is_empty());
    }

    #[tokio::test]
    async fn test_first_launch_pins_session_reattach_resumes() {
        let dir = tempdir().unwrap();
        let children = vec![Task::new("A", "Task A", ""), Task::new("B", "Task B", "")];
        let store = store_with_parent(dir.path(), &children);

        // B is mid-flight from a previous invocation with a persisted
        // session; A has never been launched.
        let mut active = WorkspaceRecord::new(
            "colony/epic-1-b",
            PathBuf::from("/ws/b"),
            vec!["B".to_string()],
        );
        active.state = TaskState::InProgress;
        active.session_id = Some("sess-b".to_string());
        store.save(&active).unwrap();

        let (coordinator, _workspaces, launcher) =
            coordinator(&store, StubWorkspaces::default(), StubLauncher::new(&[]));
        coordinator.run("EPIC-1", Vec::new()).await.unwrap();

        let flags: HashMap<String, bool> =
            launcher.resume_flags.lock().unwrap().iter().cloned().collect();
        assert!(!flags["A"], "first launch must not resume a fresh session");
        assert!(flags["B"], "persisted session must be resumed");

        // The fresh child's pinned session id was persisted for later runs.
        let archived = store.archived_record("A").unwrap().unwrap();
        assert!(archived.session_id.is_some());
    }

    #[tokio::test]
    async fn test_merge_conflict_marks_child_failed() {
        let dir = tempdir().unwrap();
        let children = vec![Task::new("A", "Task A", "")];
        let store = store_with_parent(dir.path(), &children);

        let workspaces = StubWorkspaces {
            conflict_branches: vec!["colony/epic-1-a".to_string()],
            ..StubWorkspaces::default()
        };
        let (coordinator, _workspaces, _launcher) = coordinator(
            &store,
            workspaces,
            StubLauncher::new(&[("A", TaskState::Done)]),
        );

        let summary = coordinator.run("EPIC-1", Vec::new()).await.unwrap();

        assert_eq!(summary.failed, 1);
        let failed = store.active_record("A").unwrap().unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert!(failed.last_error.unwrap().contains("Merge conflict"));
    }

    // =========================================
    // Fresh run and persistence
    // =========================================

    #[tokio::test]
    async fn test_fresh_run_persists_children_and_map() {
        let dir = tempdir().unwrap();
        let store = store_with_parent(dir.path(), &[]);

        let fetched = vec![
            Task::new("A", "Schema", ""),
            Task::new("B", "API", "depends on A"),
        ];
        let (coordinator, _workspaces, _launcher) = coordinator(
            &store,
            StubWorkspaces::default(),
            StubLauncher::new(&[("A", TaskState::Done), ("B", TaskState::Done)]),
        );

        let summary = coordinator.run("EPIC-1", fetched).await.unwrap();
        assert_eq!(summary.succeeded, 2);

        let parent = store.active_record("EPIC-1").unwrap().unwrap();
        assert_eq!(parent.child_issues.len(), 2);
        let map = parent.dependency_map.unwrap();
        assert_eq!(map["B"], vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_parent_is_fatal() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        let (coordinator, _workspaces, _launcher) =
            coordinator(&store, StubWorkspaces::default(), StubLauncher::new(&[]));

        let err = coordinator.run("EPIC-1", Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("EPIC-1"));
        assert!(err.to_string().contains("colony run"));
    }

    #[tokio::test]
    async fn test_skip_cleanup_leaves_workspace_active() {
        let dir = tempdir().unwrap();
        let children = vec![Task::new("A", "Task A", "")];
        let store = store_with_parent(dir.path(), &children);

        let workspaces = Arc::new(StubWorkspaces::default());
        let coordinator = SwarmCoordinator::new(
            store.clone(),
            Arc::clone(&workspaces) as Arc<dyn WorkspaceOps>,
            Arc::new(StubLauncher::new(&[("A", TaskState::Done)])),
            Arc::new(NoopCollector),
            SwarmOptions {
                skip_cleanup: true,
                ..SwarmOptions::default()
            },
        );

        coordinator.run("EPIC-1", Vec::new()).await.unwrap();

        // Merged but not removed or archived.
        assert_eq!(workspaces.merge_calls.lock().unwrap().len(), 1);
        assert!(workspaces.remove_calls.lock().unwrap().is_empty());
        let record = store.active_record("A").unwrap().unwrap();
        assert_eq!(record.state, TaskState::Done);
    }
}
