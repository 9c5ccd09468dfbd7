//! Durable per-workspace metadata records.
//!
//! One JSON file per workspace under `.colony/records/`, moved to
//! `.colony/archive/` when the workspace is torn down. The store is the
//! single source of truth for resume decisions: a workspace does not count
//! as active until its record is durably written, which makes the store the
//! single-writer lock for provisioning.
//!
//! Records are versioned and every field added after v1 is optional, so
//! older records stay readable and default to absent/empty.

use crate::errors::ColonyError;
use crate::graph::DependencyMap;
use crate::task::{Task, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current record schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Records written before versioning are treated as v1.
fn default_schema_version() -> u32 {
    1
}

/// Identity of the parent workspace that owns a child workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub task_id: String,
    pub branch_name: String,
    pub path: PathBuf,
}

/// Persisted metadata for one workspace (parent or child).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Branch this workspace is bound to.
    pub branch_name: String,
    /// Filesystem path of the working copy.
    pub path: PathBuf,
    /// Task identities this workspace represents.
    #[serde(default)]
    pub task_ids: Vec<String>,
    /// Owning parent workspace, or none for the top-level workspace.
    #[serde(default)]
    pub parent: Option<ParentLink>,
    /// Lifecycle state, mutated by the worker as it progresses.
    #[serde(default)]
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    /// Set when the workspace is archived.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Opaque resumable-session handle for the worker.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Parent records only: the fetched child tasks, persisted for resume.
    #[serde(default)]
    pub child_issues: Vec<Task>,
    /// Parent records only: the dependency map, persisted for resume.
    #[serde(default)]
    pub dependency_map: Option<DependencyMap>,
    /// Parent records only: persisted complexity hint.
    #[serde(default)]
    pub complexity: Option<String>,
    /// Error from the last failed attempt, if any.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkspaceRecord {
    /// Create a fresh record for a newly provisioned workspace.
    pub fn new(branch_name: &str, path: PathBuf, task_ids: Vec<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            branch_name: branch_name.to_string(),
            path,
            task_ids,
            parent: None,
            state: TaskState::Pending,
            created_at: Utc::now(),
            finished_at: None,
            session_id: None,
            child_issues: Vec::new(),
            dependency_map: None,
            complexity: None,
            last_error: None,
        }
    }

    /// Link this record to its owning parent workspace.
    pub fn with_parent(mut self, parent: ParentLink) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Check whether this record represents the given task.
    pub fn covers(&self, task_id: &str) -> bool {
        self.task_ids.iter().any(|id| id == task_id)
    }

    /// Whether the record is still active (workspace not torn down).
    pub fn is_active(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// File-backed store of workspace records, rooted at the main repo.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    records_dir: PathBuf,
    archive_dir: PathBuf,
}

impl MetadataStore {
    /// Create a store rooted at the main workspace directory.
    pub fn new(root: &Path) -> Self {
        let colony_dir = root.join(".colony");
        Self {
            records_dir: colony_dir.join("records"),
            archive_dir: colony_dir.join("archive"),
        }
    }

    /// Create the record directories if they do not exist.
    pub fn ensure_dirs(&self) -> Result<(), ColonyError> {
        for dir in [&self.records_dir, &self.archive_dir] {
            fs::create_dir_all(dir).map_err(|source| ColonyError::StoreWriteFailed {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Path of the active record file for a branch.
    pub fn record_path(&self, branch_name: &str) -> PathBuf {
        self.records_dir.join(Self::file_name(branch_name))
    }

    fn file_name(branch_name: &str) -> String {
        let stem: String = branch_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
            .collect();
        format!("{}.json", stem)
    }

    /// Durably write a record into the active set.
    ///
    /// Rejects the write if a *different* active workspace already covers any
    /// of the record's task identities: at most one active record may exist
    /// per task identity. Writing the same branch again is an update.
    pub fn save(&self, record: &WorkspaceRecord) -> Result<(), ColonyError> {
        self.ensure_dirs()?;

        for existing in self.active_records()? {
            if existing.branch_name == record.branch_name {
                continue;
            }
            if let Some(task_id) = record.task_ids.iter().find(|id| existing.covers(id)) {
                return Err(ColonyError::DuplicateActiveWorkspace {
                    task_id: task_id.clone(),
                    branch: existing.branch_name,
                });
            }
        }

        self.write_record(&self.record_path(&record.branch_name), record)
    }

    /// All records in the active set.
    pub fn active_records(&self) -> Result<Vec<WorkspaceRecord>, ColonyError> {
        Self::read_dir_records(&self.records_dir)
    }

    /// The active record covering a task identity, if any.
    pub fn active_record(&self, task_id: &str) -> Result<Option<WorkspaceRecord>, ColonyError> {
        Ok(self
            .active_records()?
            .into_iter()
            .find(|r| r.covers(task_id)))
    }

    /// The archived record covering a task identity, if any.
    ///
    /// When multiple archived records cover the same identity the most
    /// recently finished one wins.
    pub fn archived_record(&self, task_id: &str) -> Result<Option<WorkspaceRecord>, ColonyError> {
        let mut matches: Vec<WorkspaceRecord> = Self::read_dir_records(&self.archive_dir)?
            .into_iter()
            .filter(|r| r.covers(task_id))
            .collect();
        matches.sort_by_key(|r| r.finished_at);
        Ok(matches.pop())
    }

    /// Move a record out of the active set, stamping `finished_at`.
    ///
    /// The store must still answer state queries for archived records so
    /// that re-runs after cleanup do not re-execute finished work.
    pub fn archive(&self, record: &mut WorkspaceRecord) -> Result<(), ColonyError> {
        self.ensure_dirs()?;
        record.finished_at = Some(Utc::now());

        let archive_path = self.archive_dir.join(Self::file_name(&record.branch_name));
        self.write_record(&archive_path, record)?;

        let active_path = self.record_path(&record.branch_name);
        if active_path.exists() {
            fs::remove_file(&active_path).map_err(|source| ColonyError::StoreWriteFailed {
                path: active_path,
                source,
            })?;
        }
        Ok(())
    }

    fn read_dir_records(dir: &Path) -> Result<Vec<WorkspaceRecord>, ColonyError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir).map_err(|source| ColonyError::StoreReadFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ColonyError::StoreReadFailed {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            records.push(Self::read_record(&path)?);
        }
        // Stable order regardless of directory iteration order.
        records.sort_by(|a, b| a.branch_name.cmp(&b.branch_name));
        Ok(records)
    }

    fn read_record(path: &Path) -> Result<WorkspaceRecord, ColonyError> {
        let content = fs::read_to_string(path).map_err(|source| ColonyError::StoreReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ColonyError::StoreCorrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write-temp-then-rename so a crash never leaves a torn record.
    fn write_record(&self, path: &Path, record: &WorkspaceRecord) -> Result<(), ColonyError> {
        let json = serde_json::to_string_pretty(record).map_err(|source| {
            ColonyError::StoreCorrupt {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let tmp_path = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            fs::write(&tmp_path, &json)?;
            fs::rename(&tmp_path, path)
        };
        write().map_err(|source| ColonyError::StoreWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(branch: &str, task_id: &str) -> WorkspaceRecord {
        WorkspaceRecord::new(branch, PathBuf::from("/tmp/ws"), vec![task_id.to_string()])
    }

    // =========================================
    // Record tests
    // =========================================

    #[test]
    fn test_record_new_defaults() {
        let rec = record("colony/epic-1", "COL-1");

        assert_eq!(rec.schema_version, SCHEMA_VERSION);
        assert_eq!(rec.state, TaskState::Pending);
        assert!(rec.is_active());
        assert!(rec.covers("COL-1"));
        assert!(!rec.covers("COL-2"));
    }

    #[test]
    fn test_legacy_record_deserializes_with_defaults() {
        // A v1 record: no schema_version, no session_id, no dependency_map.
        let json = r#"{
            "branch_name": "colony/old",
            "path": "/tmp/old",
            "task_ids": ["COL-9"],
            "created_at": "2025-01-01T00:00:00Z"
        }"#;

        let rec: WorkspaceRecord = serde_json::from_str(json).unwrap();

        assert_eq!(rec.schema_version, 1);
        assert_eq!(rec.state, TaskState::None);
        assert!(rec.session_id.is_none());
        assert!(rec.dependency_map.is_none());
        assert!(rec.child_issues.is_empty());
    }

    // =========================================
    // Store tests
    // =========================================

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        let mut rec = record("colony/epic-col-1", "COL-1");
        rec.state = TaskState::InProgress;
        rec.session_id = Some("sess-123".to_string());
        store.save(&rec).unwrap();

        let loaded = store.active_record("COL-1").unwrap().unwrap();
        assert_eq!(loaded.branch_name, "colony/epic-col-1");
        assert_eq!(loaded.state, TaskState::InProgress);
        assert_eq!(loaded.session_id.as_deref(), Some("sess-123"));
    }

    #[test]
    fn test_save_rejects_duplicate_active_identity() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        store.save(&record("colony/a", "COL-1")).unwrap();
        let result = store.save(&record("colony/b", "COL-1"));

        match result {
            Err(ColonyError::DuplicateActiveWorkspace { task_id, branch }) => {
                assert_eq!(task_id, "COL-1");
                assert_eq!(branch, "colony/a");
            }
            other => panic!("Expected DuplicateActiveWorkspace, got {:?}", other),
        }
    }

    #[test]
    fn test_save_same_branch_is_an_update() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        let mut rec = record("colony/a", "COL-1");
        store.save(&rec).unwrap();

        rec.state = TaskState::Done;
        store.save(&rec).unwrap();

        let loaded = store.active_record("COL-1").unwrap().unwrap();
        assert_eq!(loaded.state, TaskState::Done);
        assert_eq!(store.active_records().unwrap().len(), 1);
    }

    #[test]
    fn test_archive_moves_record_out_of_active_set() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        let mut rec = record("colony/a", "COL-1");
        rec.state = TaskState::Done;
        store.save(&rec).unwrap();
        store.archive(&mut rec).unwrap();

        assert!(store.active_record("COL-1").unwrap().is_none());

        let archived = store.archived_record("COL-1").unwrap().unwrap();
        assert_eq!(archived.state, TaskState::Done);
        assert!(archived.finished_at.is_some());
        assert!(!archived.is_active());
    }

    #[test]
    fn test_archived_identity_can_be_reprovisioned() {
        // After archiving, the identity is free for a new active record.
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        let mut first = record("colony/a", "COL-1");
        first.state = TaskState::Failed;
        store.save(&first).unwrap();
        store.archive(&mut first).unwrap();

        store.save(&record("colony/a-retry", "COL-1")).unwrap();

        let active = store.active_record("COL-1").unwrap().unwrap();
        assert_eq!(active.branch_name, "colony/a-retry");
    }

    #[test]
    fn test_missing_dirs_read_as_empty() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        assert!(store.active_records().unwrap().is_empty());
        assert!(store.active_record("COL-1").unwrap().is_none());
        assert!(store.archived_record("COL-1").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_record_is_a_structural_error() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        store.ensure_dirs().unwrap();

        std::fs::write(
            dir.path().join(".colony/records/bad.json"),
            "{not json at all",
        )
        .unwrap();

        let result = store.active_records();
        assert!(matches!(result, Err(ColonyError::StoreCorrupt { .. })));
    }

    #[test]
    fn test_parent_record_persists_children_and_map() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        let mut parent = record("main", "EPIC-1");
        parent.child_issues = vec![Task::new("COL-1", "A", ""), Task::new("COL-2", "B", "")];
        let mut map = DependencyMap::new();
        map.insert("COL-2".to_string(), vec!["COL-1".to_string()]);
        parent.dependency_map = Some(map);
        store.save(&parent).unwrap();

        let loaded = store.active_record("EPIC-1").unwrap().unwrap();
        assert_eq!(loaded.child_issues.len(), 2);
        assert_eq!(
            loaded.dependency_map.unwrap()["COL-2"],
            vec!["COL-1".to_string()]
        );
    }
}
