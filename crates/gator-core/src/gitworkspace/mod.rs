//! Git-branch-per-task workspace management.
//!
//! Each task runs in its own worktree on its own branch, named
//! `<prefix>/<task_id>`. Unlike a long-lived feature branch, a task branch
//! is disposable: every dispatch attempt starts from a clean branch, so any
//! pre-existing branch of the same name is deleted unconditionally before
//! a new one is created (there is deliberately no "resume my old branch"
//! path -- a retried task gets a fresh worktree every time).
//!
//! At the end of a wave, admitted tasks' branches are merged into the
//! mission's integration branch one at a time in lexicographic task-id
//! order, pushing after each successful merge so a crash mid-wave leaves
//! the remote at a consistent prefix of the wave rather than losing it
//! all. A conflicting merge is retried by rebasing the task branch onto the
//! latest integration branch, up to [`MERGE_RETRY_COUNT`] times with a
//! short backoff, before being reported as a real conflict.
//!
//! Merges and rebases never touch `repo_path`'s own checkout: each one
//! runs against a disposable, detached-HEAD scratch worktree (one per
//! merge operation, removed on every exit path), and only the branch ref
//! itself is fast-forwarded afterwards via `update-ref`. This keeps two
//! concurrent wave-merges from corrupting each other's working tree the
//! way sharing `repo_path`'s live checkout would.
//!
//! Git does not support concurrent operations against the same repository
//! (it serialises on a lock file in the object store), so all mutating
//! operations here go through an internal mutex, as the worktree managers
//! this type is descended from have always done.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// How many times a conflicting wave-merge is retried via rebase before
/// being reported as a genuine conflict.
pub const MERGE_RETRY_COUNT: u32 = 2;

/// Base backoff between merge retries; doubles on each retry.
const MERGE_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum GitWorkspaceError {
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to parse worktree list output: {0}")]
    ParseError(String),
}

/// Outcome of merging one task's branch into the integration branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Conflict { details: String },
}

/// Outcome of merging an entire wave, one entry per admitted task in the
/// lexicographic order they were attempted.
#[derive(Debug, Clone)]
pub struct WaveMergeReport {
    pub results: Vec<(String, MergeOutcome)>,
}

impl WaveMergeReport {
    pub fn conflicted(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, o)| matches!(o, MergeOutcome::Conflict { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn all_merged(&self) -> bool {
        self.conflicted().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head_commit: String,
}

/// Manages per-task git worktrees and the wave-merge protocol.
#[derive(Debug)]
pub struct GitWorkspace {
    repo_path: PathBuf,
    worktree_base: PathBuf,
    branch_prefix: String,
    remote_name: String,
    git_lock: Arc<Mutex<()>>,
}

impl Clone for GitWorkspace {
    fn clone(&self) -> Self {
        Self {
            repo_path: self.repo_path.clone(),
            worktree_base: self.worktree_base.clone(),
            branch_prefix: self.branch_prefix.clone(),
            remote_name: self.remote_name.clone(),
            git_lock: Arc::clone(&self.git_lock),
        }
    }
}

impl GitWorkspace {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        worktree_base: Option<PathBuf>,
        branch_prefix: impl Into<String>,
    ) -> Result<Self, GitWorkspaceError> {
        let repo_path = repo_path.into();

        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--git-dir")
            .current_dir(&repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(GitWorkspaceError::NotAGitRepo(repo_path));
        }

        let worktree_base = worktree_base.unwrap_or_else(|| {
            let repo_name = repo_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("repo");
            let base_name = format!("{repo_name}-gator-worktrees");
            repo_path
                .parent()
                .map(|p| p.join(&base_name))
                .unwrap_or_else(|| PathBuf::from(base_name))
        });

        Ok(Self {
            repo_path,
            worktree_base,
            branch_prefix: branch_prefix.into(),
            remote_name: "origin".to_string(),
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn worktree_base(&self) -> &Path {
        &self.worktree_base
    }

    /// The conventional branch name for a task: `<prefix>/<task_id>`.
    pub fn task_branch_name(&self, task_id: &str) -> String {
        format!("{}/{task_id}", self.branch_prefix)
    }

    /// Create a fresh worktree for a task, unconditionally deleting any
    /// branch of the same name first so every dispatch attempt starts
    /// clean.
    pub fn create_task_workspace(&self, task_id: &str) -> Result<WorktreeInfo, GitWorkspaceError> {
        let branch_name = self.task_branch_name(task_id);
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let dir_name = branch_name.replace('/', "--");
        let worktree_path = self.worktree_base.join(&dir_name);

        if let Ok(existing) = self.find_worktree_by_path_locked(&worktree_path) {
            self.remove_worktree_files_locked(&existing.path)?;
        }
        drop(self.delete_branch_locked(&branch_name));

        if !self.worktree_base.exists() {
            std::fs::create_dir_all(&self.worktree_base).map_err(|e| {
                GitWorkspaceError::GitCommand {
                    message: format!(
                        "failed to create worktree base directory: {}",
                        self.worktree_base.display()
                    ),
                    source: e,
                }
            })?;
        }

        let output = Command::new("git")
            .args(["worktree", "add", "-b"])
            .arg(&branch_name)
            .arg(&worktree_path)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git worktree add -b".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            self.cleanup_partial_locked(&worktree_path);
            return Err(GitWorkspaceError::GitExit {
                command: "worktree add".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        self.find_worktree_by_path_locked(&worktree_path)
    }

    /// Remove a task's worktree (branch is left in place for merging).
    pub fn remove_task_workspace(&self, path: &Path) -> Result<(), GitWorkspaceError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.remove_worktree_files_locked(path)
    }

    fn remove_worktree_files_locked(&self, path: &Path) -> Result<(), GitWorkspaceError> {
        if self.find_worktree_by_path_locked(path).is_err() {
            if path.exists() {
                let _ = std::fs::remove_dir_all(path);
            }
            return Ok(());
        }

        let output = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(path)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git worktree remove".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(GitWorkspaceError::GitExit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// Stage everything, commit, and push the task branch. Idempotent:
    /// returns `Ok(false)` without committing if the working tree is
    /// clean (the "lazy model" empty-diff guard).
    pub fn commit_and_push(
        &self,
        workspace_path: &Path,
        branch_name: &str,
        message: &str,
    ) -> Result<bool, GitWorkspaceError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        self.run_git(workspace_path, &["add", "-A"])?;

        let status = self.run_git(workspace_path, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            return Ok(false);
        }

        self.run_git(workspace_path, &["commit", "-m", message])?;

        let push_result = Command::new("git")
            .args(["push", "--force-with-lease", "-u", &self.remote_name])
            .arg(branch_name)
            .current_dir(workspace_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git push".into(),
                source: e,
            })?;

        if !push_result.status.success() {
            let stderr = String::from_utf8_lossy(&push_result.stderr).to_string();
            return Err(GitWorkspaceError::GitExit {
                command: "push".into(),
                code: push_result.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(true)
    }

    /// Merge a wave's admitted task branches into `integration_branch`, one
    /// at a time in lexicographic task-id order, pushing the integration
    /// branch after each successful merge. A conflicting merge is retried
    /// by rebasing the task branch onto the (now-updated) integration
    /// branch up to `MERGE_RETRY_COUNT` times before being reported.
    pub fn merge_wave(
        &self,
        integration_branch: &str,
        mut admitted_task_ids: Vec<String>,
    ) -> Result<WaveMergeReport, GitWorkspaceError> {
        admitted_task_ids.sort();

        let mut results = Vec::with_capacity(admitted_task_ids.len());
        for task_id in admitted_task_ids {
            let branch_name = self.task_branch_name(&task_id);
            let outcome = self.merge_one_with_retry(integration_branch, &branch_name)?;
            let merged = matches!(outcome, MergeOutcome::Merged);
            results.push((task_id, outcome));

            if merged {
                self.push_integration_branch(integration_branch)?;
            }
        }

        Ok(WaveMergeReport { results })
    }

    fn merge_one_with_retry(
        &self,
        integration_branch: &str,
        branch_name: &str,
    ) -> Result<MergeOutcome, GitWorkspaceError> {
        let mut attempt = 0;
        loop {
            let outcome = self.merge_branch(integration_branch, branch_name)?;
            match outcome {
                MergeOutcome::Merged => return Ok(MergeOutcome::Merged),
                MergeOutcome::Conflict { details } => {
                    if attempt >= MERGE_RETRY_COUNT {
                        return Ok(MergeOutcome::Conflict { details });
                    }
                    self.rebase_onto(branch_name, integration_branch)?;
                    attempt += 1;
                    thread::sleep(MERGE_RETRY_BACKOFF * 2u32.pow(attempt - 1));
                }
            }
        }
    }

    fn merge_branch(
        &self,
        integration_branch: &str,
        branch_name: &str,
    ) -> Result<MergeOutcome, GitWorkspaceError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let scratch = self.create_merge_scratch_locked(integration_branch)?;
        let result = self.merge_in_scratch_locked(&scratch, integration_branch, branch_name);
        self.remove_merge_scratch_locked(&scratch);
        result
    }

    /// Check out `ref_name`'s current commit, detached, into a disposable
    /// worktree under `worktree_base`. `--detach` sidesteps git's "branch
    /// already checked out" restriction, so this works even when
    /// `ref_name` is the branch `repo_path` itself currently has open.
    fn create_merge_scratch_locked(&self, ref_name: &str) -> Result<PathBuf, GitWorkspaceError> {
        if !self.worktree_base.exists() {
            std::fs::create_dir_all(&self.worktree_base).map_err(|e| GitWorkspaceError::GitCommand {
                message: format!(
                    "failed to create worktree base directory: {}",
                    self.worktree_base.display()
                ),
                source: e,
            })?;
        }

        let scratch = self.worktree_base.join(format!(".merge-scratch-{}", Uuid::new_v4()));

        let output = Command::new("git")
            .args(["worktree", "add", "--detach"])
            .arg(&scratch)
            .arg(ref_name)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git worktree add --detach".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            self.cleanup_partial_locked(&scratch);
            return Err(GitWorkspaceError::GitExit {
                command: "worktree add --detach".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(scratch)
    }

    fn remove_merge_scratch_locked(&self, scratch: &Path) {
        let _ = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(scratch)
            .current_dir(&self.repo_path)
            .output();
        if scratch.exists() {
            let _ = std::fs::remove_dir_all(scratch);
        }
    }

    fn merge_in_scratch_locked(
        &self,
        scratch: &Path,
        integration_branch: &str,
        branch_name: &str,
    ) -> Result<MergeOutcome, GitWorkspaceError> {
        let output = Command::new("git")
            .args(["merge", "--no-ff", branch_name])
            .current_dir(scratch)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git merge".into(),
                source: e,
            })?;

        if output.status.success() {
            let new_sha = self.run_git(scratch, &["rev-parse", "HEAD"])?.trim().to_string();
            self.run_git(
                &self.repo_path,
                &["update-ref", &format!("refs/heads/{integration_branch}"), &new_sha],
            )?;
            return Ok(MergeOutcome::Merged);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if stderr.contains("CONFLICT")
            || stdout.contains("CONFLICT")
            || stderr.contains("Automatic merge failed")
        {
            let _ = Command::new("git")
                .args(["merge", "--abort"])
                .current_dir(scratch)
                .output();

            return Ok(MergeOutcome::Conflict {
                details: format!("{stdout}\n{stderr}").trim().to_string(),
            });
        }

        Err(GitWorkspaceError::GitExit {
            command: "merge".into(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }

    fn rebase_onto(
        &self,
        branch_name: &str,
        integration_branch: &str,
    ) -> Result<(), GitWorkspaceError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let scratch = self.create_merge_scratch_locked(branch_name)?;
        let result = self.rebase_in_scratch_locked(&scratch, branch_name, integration_branch);
        self.remove_merge_scratch_locked(&scratch);
        result
    }

    fn rebase_in_scratch_locked(
        &self,
        scratch: &Path,
        branch_name: &str,
        integration_branch: &str,
    ) -> Result<(), GitWorkspaceError> {
        let output = Command::new("git")
            .args(["rebase", integration_branch])
            .current_dir(scratch)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git rebase".into(),
                source: e,
            })?;

        if !output.status.success() {
            let _ = Command::new("git").args(["rebase", "--abort"]).current_dir(scratch).output();
            return Ok(());
        }

        let new_sha = self.run_git(scratch, &["rev-parse", "HEAD"])?.trim().to_string();
        self.run_git(&self.repo_path, &["update-ref", &format!("refs/heads/{branch_name}"), &new_sha])?;

        if self.has_remote_locked() {
            let _ = Command::new("git")
                .args(["push", "--force", &self.remote_name])
                .arg(branch_name)
                .current_dir(&self.repo_path)
                .output();
        }

        Ok(())
    }

    /// Whether `remote_name` is configured at all. A workspace with no
    /// remote (e.g. a local-only test fixture) merges and rebases purely
    /// against local refs and skips every push silently.
    fn has_remote_locked(&self) -> bool {
        Command::new("git")
            .args(["remote", "get-url", &self.remote_name])
            .current_dir(&self.repo_path)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn push_integration_branch(&self, integration_branch: &str) -> Result<(), GitWorkspaceError> {
        if !self.has_remote_locked() {
            return Ok(());
        }

        let output = Command::new("git")
            .args(["push", &self.remote_name])
            .arg(integration_branch)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to push integration branch".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitWorkspaceError::GitExit {
                command: "push".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }

    /// End-of-mission cleanup: delete branches for passed-and-merged tasks,
    /// preserve branches for failed tasks (so the partial work is
    /// inspectable), and delete everything if the whole mission failed.
    pub fn cleanup_mission(
        &self,
        merged_task_ids: &[String],
        failed_task_ids: &[String],
        mission_failed: bool,
    ) -> Result<(), GitWorkspaceError> {
        if mission_failed {
            for id in merged_task_ids.iter().chain(failed_task_ids) {
                self.delete_branch(&self.task_branch_name(id))?;
            }
            return Ok(());
        }

        for id in merged_task_ids {
            self.delete_branch(&self.task_branch_name(id))?;
        }
        Ok(())
    }

    pub fn delete_branch(&self, branch_name: &str) -> Result<(), GitWorkspaceError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.delete_branch_locked(branch_name)
    }

    fn delete_branch_locked(&self, branch_name: &str) -> Result<(), GitWorkspaceError> {
        let output = Command::new("git")
            .args(["branch", "-D", branch_name])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git branch -D".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("not found") {
                return Ok(());
            }
            return Err(GitWorkspaceError::GitExit {
                command: "branch -D".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }

    pub fn branch_exists(&self, branch_name: &str) -> Result<bool, GitWorkspaceError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify"])
            .arg(format!("refs/heads/{branch_name}"))
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git rev-parse --verify".into(),
                source: e,
            })?;
        Ok(output.status.success())
    }

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitWorkspaceError> {
        let output = Command::new("git")
            .args(["worktree", "list", "--porcelain"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: "failed to run git worktree list".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitWorkspaceError::GitExit {
                command: "worktree list".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        parse_porcelain_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<String, GitWorkspaceError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| GitWorkspaceError::GitCommand {
                message: format!("failed to run git {}", args.join(" ")),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitWorkspaceError::GitExit {
                command: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn find_worktree_by_path_locked(
        &self,
        path: &Path,
    ) -> Result<WorktreeInfo, GitWorkspaceError> {
        let worktrees = self.list_worktrees()?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        for wt in worktrees {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }

        Err(GitWorkspaceError::ParseError(format!(
            "worktree not found at path: {}",
            path.display()
        )))
    }

    fn cleanup_partial_locked(&self, path: &Path) {
        if path.exists() {
            let _ = std::fs::remove_dir_all(path);
        }
        let _ = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_path)
            .output();
    }
}

fn parse_porcelain_output(output: &str) -> Result<Vec<WorktreeInfo>, GitWorkspaceError> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let (Some(path), Some(head)) = (current_path.take(), current_head.take()) {
                worktrees.push(WorktreeInfo {
                    path,
                    branch: current_branch.take(),
                    head_commit: head,
                });
            } else {
                current_path = None;
                current_head = None;
                current_branch = None;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string();
            current_branch = Some(branch);
        }
    }

    if let (Some(path), Some(head)) = (current_path, current_head) {
        worktrees.push(WorktreeInfo {
            path,
            branch: current_branch,
            head_commit: head,
        });
    }

    Ok(worktrees)
}

/// Turn a worktree's uncommitted diff against `HEAD` into [`FileRecord`]s,
/// used by the local sandbox provider's `detectChanges` call. Combines
/// `git status --porcelain` (for the created/modified/deleted action) with
/// `git diff --numstat` (for line counts).
pub fn diff_stat_file_records(worktree_path: &str) -> Result<Vec<crate::mission::types::FileRecord>, GitWorkspaceError> {
    use crate::mission::types::{FileAction, FileRecord};

    let status_output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(worktree_path)
        .output()
        .map_err(|e| GitWorkspaceError::GitCommand {
            message: "failed to run git status --porcelain".into(),
            source: e,
        })?;

    if !status_output.status.success() {
        let stderr = String::from_utf8_lossy(&status_output.stderr).to_string();
        return Err(GitWorkspaceError::GitExit {
            command: "status --porcelain".into(),
            code: status_output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    let mut actions = std::collections::HashMap::new();
    for line in String::from_utf8_lossy(&status_output.stdout).lines() {
        if line.len() < 3 {
            continue;
        }
        let code = &line[..2];
        let path = line[3..].trim().to_string();
        let action = if code.contains('D') {
            FileAction::Deleted
        } else if code.contains('?') || code.contains('A') {
            FileAction::Created
        } else {
            FileAction::Modified
        };
        actions.insert(path, action);
    }

    let numstat_output = Command::new("git")
        .args(["diff", "--numstat", "HEAD"])
        .current_dir(worktree_path)
        .output()
        .map_err(|e| GitWorkspaceError::GitCommand {
            message: "failed to run git diff --numstat".into(),
            source: e,
        })?;

    let mut records = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if numstat_output.status.success() {
        for line in String::from_utf8_lossy(&numstat_output.stdout).lines() {
            let mut parts = line.split_whitespace();
            let added = parts.next().unwrap_or("0");
            let removed = parts.next().unwrap_or("0");
            let path = match parts.next() {
                Some(p) => p.to_string(),
                None => continue,
            };

            let added: u32 = added.parse().unwrap_or(0);
            let removed: u32 = removed.parse().unwrap_or(0);
            let action = actions.get(&path).copied().unwrap_or(FileAction::Modified);

            seen.insert(path.clone());
            records.push(FileRecord {
                path,
                action,
                lines_changed: added + removed,
            });
        }
    }

    for (path, action) in actions {
        if !seen.contains(&path) {
            records.push(FileRecord {
                path,
                action,
                lines_changed: 0,
            });
        }
    }

    Ok(records)
}
