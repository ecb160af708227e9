//! Git adapter for the checkpoint manager and the read-only agent tools.
//!
//! The orchestrator owns the repository and commits deterministically, so we
//! keep a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%H%x1f%P%x1f%B%x1e";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// One commit as read from `git log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sha: String,
    /// First parent, if any.
    pub parent: Option<String>,
    /// Full message (subject, body and trailers).
    pub message: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True when `workdir` is the top level of a repository.
    pub fn is_repository(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    #[instrument(skip_all)]
    pub fn init(&self) -> Result<()> {
        debug!(workdir = %self.workdir.display(), "git init");
        self.run_checked(&["init", "--quiet"])?;
        Ok(())
    }

    /// Return the current branch name (errors on detached HEAD). Works on unborn branches.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !out.status.success() {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Full SHA of HEAD, or `None` before the first commit.
    pub fn head_sha(&self) -> Result<Option<String>> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string()))
    }

    /// Resolve any revision to a full commit SHA.
    pub fn resolve_commit(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        if !out.status.success() {
            return Err(anyhow!("unknown commit '{rev}'"));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// True if `ancestor` is reachable from `descendant` (or equal to it).
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let out = self.run(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(anyhow!(
                "git merge-base --is-ancestor failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )),
        }
    }

    /// Newest-first history of HEAD, at most `limit` commits.
    pub fn log(&self, limit: usize) -> Result<Vec<LogEntry>> {
        if self.head_sha()?.is_none() || limit == 0 {
            return Ok(Vec::new());
        }
        let count = format!("--max-count={limit}");
        let out = self.run_capture(&["log", &count, LOG_FORMAT])?;
        parse_log(&out)
    }

    /// A single commit by revision.
    pub fn log_entry(&self, rev: &str) -> Result<LogEntry> {
        let out = self.run_capture(&["log", "--max-count=1", LOG_FORMAT, rev])?;
        parse_log(&out)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("commit {rev} not found"))
    }

    /// `git log --oneline` text for the agent's read-only tool.
    pub fn log_oneline(&self, limit: usize) -> Result<String> {
        if self.head_sha()?.is_none() {
            return Ok(String::new());
        }
        let count = format!("--max-count={limit}");
        self.run_capture(&["log", "--oneline", &count])
    }

    /// `git status --short` text for the agent's read-only tool.
    pub fn status_short(&self) -> Result<String> {
        self.run_capture(&["status", "--short"])
    }

    /// Unstaged and staged changes against HEAD (or the index before the first commit).
    pub fn diff_head(&self) -> Result<String> {
        if self.head_sha()?.is_none() {
            return self.run_capture(&["diff"]);
        }
        self.run_capture(&["diff", "HEAD"])
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is clean, allowing entries with any of the given prefixes.
    #[instrument(skip_all)]
    pub fn ensure_clean_except_prefixes(&self, allowed_prefixes: &[&str]) -> Result<()> {
        let entries = self.status_porcelain()?;
        let disallowed: Vec<StatusEntry> = entries
            .into_iter()
            .filter(|entry| {
                !allowed_prefixes
                    .iter()
                    .any(|prefix| entry.path.starts_with(prefix))
            })
            .collect();
        if disallowed.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(disallowed_count = disallowed.len(), "worktree not clean");
        let mut msg = String::new();
        msg.push_str("working tree not clean (uncommitted changes):\n");
        for entry in disallowed {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        if self.head_sha()?.is_none() {
            let out = self.run_capture(&["ls-files", "--cached"])?;
            return Ok(!out.trim().is_empty());
        }
        let out = self.run(&["diff", "--cached", "--quiet"])?;
        Ok(!out.status.success())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    /// Repository hooks are skipped; the orchestrator is the only committer.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "--quiet", "--no-verify", "-m", message])?;
        Ok(true)
    }

    /// Remove untracked files and directories (ignored files are kept).
    #[instrument(skip_all)]
    pub fn clean_untracked(&self) -> Result<()> {
        self.run_checked(&["clean", "-f", "-d", "--quiet"])?;
        Ok(())
    }

    /// Replace index and working tree with the tree of `rev`.
    ///
    /// Tracked files absent from `rev` are removed; HEAD does not move.
    #[instrument(skip_all, fields(rev))]
    pub fn restore_tree(&self, rev: &str) -> Result<()> {
        self.run_checked(&["read-tree", "-u", "--reset", rev])?;
        Ok(())
    }

    /// Move HEAD to `rev` without touching index or working tree.
    #[instrument(skip_all, fields(rev))]
    pub fn reset_soft(&self, rev: &str) -> Result<()> {
        self.run_checked(&["reset", "--soft", "--quiet", rev])?;
        Ok(())
    }

    /// File contents at `rev`, or `None` when the file does not exist there.
    pub fn show_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{rev}:{path}");
        let exists = self.run(&["cat-file", "-e", &spec])?;
        if !exists.status.success() {
            return Ok(None);
        }
        self.run_capture(&["show", &spec]).map(Some)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_log(raw: &str) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for record in raw.split(RECORD_SEP) {
        let record = record.trim_start_matches('\n');
        if record.trim().is_empty() {
            continue;
        }
        let mut fields = record.splitn(3, FIELD_SEP);
        let (Some(sha), Some(parents), Some(message)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(anyhow!("unexpected git log record: '{record}'"));
        };
        entries.push(LogEntry {
            sha: sha.trim().to_string(),
            parent: parents.split_whitespace().next().map(str::to_string),
            message: message.trim_end().to_string(),
        });
    }
    Ok(entries)
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn parses_log_records() {
        let raw = "aaa\u{1f}bbb ccc\u{1f}subject\n\nBaton-Task: T1\n\u{1e}\nbbb\u{1f}\u{1f}root commit\n\u{1e}\n";
        let entries = parse_log(raw).expect("parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sha, "aaa");
        assert_eq!(entries[0].parent.as_deref(), Some("bbb"));
        assert_eq!(entries[0].message, "subject\n\nBaton-Task: T1");
        assert_eq!(entries[1].parent, None);
        assert_eq!(entries[1].message, "root commit");
    }

    #[test]
    fn log_is_empty_before_first_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        git.init().expect("init");
        assert!(git.is_repository());
        assert_eq!(git.head_sha().expect("head"), None);
        assert!(git.log(5).expect("log").is_empty());
    }
}
