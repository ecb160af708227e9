//! Checkpoints are git commits on the current branch.
//!
//! The task a checkpoint closes out is recorded as a `Baton-Task: <id>`
//! trailer. History stays linear: rollback restores an older tree into the
//! working copy and the caller commits it on top of HEAD.

use std::path::Path;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::BatonError;
use crate::io::git::{Git, LogEntry};

pub const TASK_TRAILER: &str = "Baton-Task";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub commit_id: String,
    /// Subject line of the commit message.
    pub message: String,
    pub parent: Option<String>,
    pub task_id: Option<String>,
}

impl Checkpoint {
    fn from_log(entry: LogEntry) -> Self {
        let message = entry.message.lines().next().unwrap_or_default().to_string();
        let task_id = parse_task_trailer(&entry.message);
        Self {
            commit_id: entry.sha,
            message,
            parent: entry.parent,
            task_id,
        }
    }

    pub fn short_id(&self) -> &str {
        let end = self.commit_id.len().min(12);
        &self.commit_id[..end]
    }
}

/// Full commit message for a checkpoint.
pub fn checkpoint_message(subject: &str, task_id: Option<&str>) -> String {
    match task_id {
        Some(id) => format!("{subject}\n\n{TASK_TRAILER}: {id}\n"),
        None => format!("{subject}\n"),
    }
}

fn parse_task_trailer(message: &str) -> Option<String> {
    let prefix = format!("{TASK_TRAILER}:");
    message
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(&prefix))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    git: Git,
}

impl CheckpointManager {
    pub fn new(root: &Path) -> Self {
        Self {
            git: Git::new(root),
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// `git init` when the root is not a repository yet. Returns true if it created one.
    pub fn ensure_repository(&self) -> Result<bool> {
        if self.git.is_repository() {
            return Ok(false);
        }
        self.git.init()?;
        info!(root = %self.git.workdir().display(), "initialized git repository");
        Ok(true)
    }

    /// Stage everything (respecting `.gitignore`) and commit.
    ///
    /// Fails with [`BatonError::NothingToCommit`] when the tree matches HEAD.
    #[instrument(skip_all, fields(task_id = task_id.unwrap_or("-")))]
    pub fn commit(&self, subject: &str, task_id: Option<&str>) -> Result<Checkpoint> {
        self.git.add_all()?;
        if !self.git.commit_staged(&checkpoint_message(subject, task_id))? {
            return Err(BatonError::NothingToCommit.into());
        }
        let head = self
            .head()?
            .ok_or_else(|| anyhow!("commit succeeded but HEAD is unborn"))?;
        info!(commit = head.short_id(), subject, "checkpoint committed");
        Ok(head)
    }

    /// Newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        Ok(self
            .git
            .log(limit)?
            .into_iter()
            .map(Checkpoint::from_log)
            .collect())
    }

    /// The current recovery point, if any commit exists.
    pub fn head(&self) -> Result<Option<Checkpoint>> {
        Ok(self.history(1)?.into_iter().next())
    }

    /// Restore the working tree to `commit_id`. Destroys uncommitted work.
    ///
    /// The target must be HEAD or one of its ancestors. HEAD itself does not
    /// move; the restored tree is left for the caller to commit.
    #[instrument(skip_all, fields(commit_id))]
    pub fn revert_to(&self, commit_id: &str) -> Result<Checkpoint> {
        let head = self
            .git
            .head_sha()?
            .ok_or_else(|| anyhow!("no checkpoints yet; nothing to revert to"))?;
        let target = self.git.resolve_commit(commit_id)?;
        if !self.git.is_ancestor(&target, &head)? {
            return Err(anyhow!(
                "commit {commit_id} is not an ancestor of HEAD; refusing to revert"
            ));
        }
        self.git.clean_untracked()?;
        self.git.restore_tree(&target)?;
        info!(target = %target, "working tree restored");
        Ok(Checkpoint::from_log(self.git.log_entry(&target)?))
    }

    /// Drop every uncommitted change, returning to HEAD's tree.
    pub fn discard_uncommitted(&self) -> Result<()> {
        let Some(head) = self.git.head_sha()? else {
            return Ok(());
        };
        self.git.clean_untracked()?;
        self.git.restore_tree(&head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use std::fs;

    #[test]
    fn trailer_round_trips_through_message() {
        let message = checkpoint_message("baton: session 2 coder", Some("T4"));
        assert_eq!(parse_task_trailer(&message), Some("T4".to_string()));
        assert_eq!(parse_task_trailer(&checkpoint_message("x", None)), None);
    }

    #[test]
    fn commit_records_task_and_parent() {
        let repo = TestRepo::new().expect("repo");
        let manager = CheckpointManager::new(repo.root());
        let first = manager.head().expect("head").expect("initial commit");

        fs::write(repo.root().join("a.txt"), "a").expect("write");
        let checkpoint = manager.commit("add a", Some("T1")).expect("commit");

        assert_eq!(checkpoint.message, "add a");
        assert_eq!(checkpoint.task_id.as_deref(), Some("T1"));
        assert_eq!(checkpoint.parent.as_deref(), Some(first.commit_id.as_str()));

        let history = manager.history(5).expect("history");
        assert_eq!(history[0], checkpoint);
        assert_eq!(history[1].commit_id, first.commit_id);
    }

    #[test]
    fn commit_without_changes_is_nothing_to_commit() {
        let repo = TestRepo::new().expect("repo");
        let manager = CheckpointManager::new(repo.root());
        let err = manager.commit("empty", None).unwrap_err();
        assert_eq!(
            crate::error::as_baton(&err),
            Some(&BatonError::NothingToCommit)
        );
    }

    #[test]
    fn revert_restores_tree_without_moving_head() {
        let repo = TestRepo::new().expect("repo");
        let root = repo.root();
        let manager = CheckpointManager::new(root);

        fs::write(root.join("a.txt"), "v1").expect("write");
        let v1 = manager.commit("v1", None).expect("commit v1");
        fs::write(root.join("a.txt"), "v2").expect("write");
        fs::write(root.join("b.txt"), "new").expect("write");
        let v2 = manager.commit("v2", None).expect("commit v2");
        fs::write(root.join("scratch.txt"), "uncommitted").expect("write");

        let target = manager.revert_to(&v1.commit_id).expect("revert");

        assert_eq!(target.commit_id, v1.commit_id);
        assert_eq!(fs::read_to_string(root.join("a.txt")).expect("a"), "v1");
        assert!(!root.join("b.txt").exists());
        assert!(!root.join("scratch.txt").exists());
        assert_eq!(
            manager.head().expect("head").expect("head").commit_id,
            v2.commit_id
        );

        let restored = manager.commit("restore v1", None).expect("commit restore");
        assert_eq!(restored.parent.as_deref(), Some(v2.commit_id.as_str()));
    }

    #[test]
    fn revert_rejects_unknown_commit() {
        let repo = TestRepo::new().expect("repo");
        let manager = CheckpointManager::new(repo.root());
        assert!(manager.revert_to("deadbeef").is_err());
    }

    #[test]
    fn discard_uncommitted_returns_to_head() {
        let repo = TestRepo::new().expect("repo");
        let root = repo.root();
        let manager = CheckpointManager::new(root);
        fs::write(root.join("a.txt"), "committed").expect("write");
        manager.commit("a", None).expect("commit");

        fs::write(root.join("a.txt"), "dirty").expect("write");
        fs::write(root.join("new.txt"), "untracked").expect("write");
        manager.discard_uncommitted().expect("discard");

        assert_eq!(fs::read_to_string(root.join("a.txt")).expect("a"), "committed");
        assert!(!root.join("new.txt").exists());
        manager.git().ensure_clean_except_prefixes(&[]).expect("clean");
    }
}
