//! Workspace lifecycle management on top of git worktrees.
//!
//! A workspace is an isolated, branch-bound working copy under
//! `.colony/worktrees/`. The manager shells out to `git` for all mutations
//! and exposes the narrow create/find/remove contract the coordinator needs
//! through the [`WorkspaceOps`] trait so tests can substitute a stub.

use crate::errors::ColonyError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// One entry from `git worktree list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
}

/// The workspace primitive the coordinator depends on.
#[async_trait]
pub trait WorkspaceOps: Send + Sync {
    /// Create a workspace bound to a new branch; returns its path.
    async fn create(&self, branch: &str) -> Result<PathBuf>;

    /// Remove a workspace working copy.
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Merge a branch into the parent workspace's checked-out branch.
    ///
    /// Returns `Ok(false)` on a merge conflict (after aborting the merge),
    /// `Ok(true)` otherwise. Merging an already-merged branch is a no-op
    /// success.
    async fn merge_branch(&self, branch: &str, parent_workspace: &Path) -> Result<bool>;
}

/// Git-backed workspace manager rooted at the main repository.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    repo_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    /// Where worktrees for this repository live.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.repo_dir.join(".colony").join("worktrees")
    }

    /// List all worktrees of the repository, main working copy included.
    pub async fn list(&self) -> Result<Vec<WorktreeInfo>> {
        let output = Command::new("git")
            .args(["worktree", "list", "--porcelain"])
            .current_dir(&self.repo_dir)
            .output()
            .await
            .context("Failed to run git worktree list")?;

        if !output.status.success() {
            return Err(git_failed("worktree list", &output.stderr).into());
        }

        Ok(parse_worktree_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Find the first worktree matching the predicate.
    pub async fn find<F>(&self, predicate: F) -> Result<Option<PathBuf>>
    where
        F: Fn(&WorktreeInfo) -> bool,
    {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|info| predicate(info))
            .map(|info| info.path))
    }

    /// Whether `dir` is the top-level (main) working copy rather than a
    /// derived worktree. In the main workspace the per-worktree git dir and
    /// the common git dir are the same.
    pub async fn is_main_workspace(dir: &Path) -> Result<bool> {
        let git_dir = rev_parse(dir, "--absolute-git-dir").await?;
        let common_dir = rev_parse(dir, "--git-common-dir").await?;

        let common = if Path::new(&common_dir).is_absolute() {
            PathBuf::from(&common_dir)
        } else {
            dir.join(&common_dir)
        };
        Ok(PathBuf::from(git_dir) == common)
    }
}

/// Name of the branch checked out in `dir`.
pub async fn current_branch(dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run git rev-parse")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Cannot determine current branch: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn rev_parse(dir: &Path, arg: &str) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", arg])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run git rev-parse")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "Not inside a git repository ({}): {}",
            dir.display(),
            stderr.trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl WorkspaceOps for WorkspaceManager {
    async fn create(&self, branch: &str) -> Result<PathBuf> {
        validate_branch_name(branch)?;

        let path = self.worktrees_dir().join(slugify(branch, 60));
        let parent = path
            .parent()
            .context("Worktree path has no parent directory")?;
        tokio::fs::create_dir_all(parent).await?;

        let path_str = path
            .to_str()
            .context("Worktree path contains invalid UTF-8")?;

        debug!(branch, path = path_str, "creating worktree");
        // -B: a retried task reuses its branch name; the failed attempt's
        // branch is reset rather than kept.
        let output = Command::new("git")
            .args(["worktree", "add", "-B", branch, path_str])
            .current_dir(&self.repo_dir)
            .output()
            .await
            .context("Failed to create git worktree")?;

        if !output.status.success() {
            return Err(git_failed("worktree add", &output.stderr).into());
        }

        Ok(path)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        let output = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(path)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .context("Failed to run git worktree remove")?;

        if !output.status.success() {
            return Err(git_failed("worktree remove", &output.stderr).into());
        }
        Ok(())
    }

    async fn merge_branch(&self, branch: &str, parent_workspace: &Path) -> Result<bool> {
        validate_branch_name(branch)?;

        let output = Command::new("git")
            .args(["merge", "--no-edit", branch])
            .current_dir(parent_workspace)
            .output()
            .await
            .context("Failed to run git merge")?;

        if output.status.success() {
            return Ok(true);
        }

        // Conflict: leave the tree clean for the next attempt.
        let abort = Command::new("git")
            .args(["merge", "--abort"])
            .current_dir(parent_workspace)
            .output()
            .await;
        if let Err(e) = abort {
            debug!("git merge --abort failed: {e:#}");
        }
        Ok(false)
    }
}

fn git_failed(command: &str, stderr: &[u8]) -> ColonyError {
    ColonyError::GitCommandFailed {
        command: command.to_string(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}

fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(info) = current.take() {
                worktrees.push(info);
            }
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                branch: None,
                head: None,
            });
        } else if let Some(head) = line.strip_prefix("HEAD ")
            && let Some(info) = current.as_mut()
        {
            info.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ")
            && let Some(info) = current.as_mut()
        {
            info.branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string(),
            );
        }
    }
    if let Some(info) = current {
        worktrees.push(info);
    }
    worktrees
}

/// Validate a branch name before any workspace mutation.
pub fn validate_branch_name(name: &str) -> Result<(), ColonyError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('/')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ColonyError::InvalidBranchName {
            name: name.to_string(),
        })
    }
}

/// Validate a remote name before any workspace mutation.
pub fn validate_remote_name(name: &str) -> Result<(), ColonyError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ColonyError::InvalidRemoteName {
            name: name.to_string(),
        })
    }
}

/// Turn an arbitrary string into a filesystem-friendly slug.
pub fn slugify(input: &str, max_len: usize) -> String {
    let slug: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed: String = slug.trim_matches('-').chars().take(max_len).collect();
    trimmed.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // Porcelain parsing tests
    // =========================================

    #[test]
    fn test_parse_worktree_list() {
        let porcelain = "worktree /repo\n\
                         HEAD abc123\n\
                         branch refs/heads/main\n\
                         \n\
                         worktree /repo/.colony/worktrees/colony-epic-col-1\n\
                         HEAD def456\n\
                         branch refs/heads/colony/epic-col-1\n\
                         \n\
                         worktree /repo/.colony/worktrees/detached\n\
                         HEAD 789abc\n\
                         detached\n";

        let worktrees = parse_worktree_list(porcelain);

        assert_eq!(worktrees.len(), 3);
        assert_eq!(worktrees[0].path, PathBuf::from("/repo"));
        assert_eq!(worktrees[0].branch.as_deref(), Some("main"));
        assert_eq!(
            worktrees[1].branch.as_deref(),
            Some("colony/epic-col-1")
        );
        assert_eq!(worktrees[2].branch, None);
        assert_eq!(worktrees[2].head.as_deref(), Some("789abc"));
    }

    #[test]
    fn test_parse_worktree_list_empty() {
        assert!(parse_worktree_list("").is_empty());
    }

    // =========================================
    // Validation tests
    // =========================================

    #[test]
    fn test_validate_branch_name_accepts_typical_names() {
        assert!(validate_branch_name("colony/epic-col-1").is_ok());
        assert!(validate_branch_name("feature/auth_v2.1").is_ok());
    }

    #[test]
    fn test_validate_branch_name_rejects_bad_names() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("-flag-injection").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("dot..dot").is_err());
        assert!(validate_branch_name("trailing/").is_err());
    }

    #[test]
    fn test_validate_remote_name() {
        assert!(validate_remote_name("origin").is_ok());
        assert!(validate_remote_name("my_fork-2").is_ok());
        assert!(validate_remote_name("").is_err());
        assert!(validate_remote_name("-upload-pack").is_err());
        assert!(validate_remote_name("remote/with/slash").is_err());
    }

    #[tokio::test]
    async fn test_git_failure_surfaces_typed_error() {
        // Not a repository, so any worktree mutation fails in git.
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(dir.path().to_path_buf());

        let err = manager
            .remove(Path::new("/nonexistent-worktree"))
            .await
            .unwrap_err();
        let colony_err = err.downcast_ref::<ColonyError>().expect("typed git error");
        assert!(matches!(colony_err, ColonyError::GitCommandFailed { .. }));
    }

    // =========================================
    // Slugify tests
    // =========================================

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("colony/epic-COL-1", 60), "colony-epic-col-1");
        assert_eq!(slugify("Very Long Name!", 6), "very-l");
        assert_eq!(slugify("--edges--", 60), "edges");
    }
}
