//! Append-only progress journal stored as JSON Lines.
//!
//! Each entry is written with one `write_all` followed by `sync_data`, so an
//! entry is either fully on disk or, after a crash mid-write, a torn final
//! line. Readers skip a torn final line; earlier lines are never rewritten.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::{SessionKind, SessionOutcome};
use crate::error::BatonError;

/// Who wrote a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Initializer,
    Coder,
    /// Written by the orchestrator for operator reverts.
    Recovery,
}

impl From<SessionKind> for EntryKind {
    fn from(kind: SessionKind) -> Self {
        match kind {
            SessionKind::Initializer => Self::Initializer,
            SessionKind::Coder => Self::Coder,
        }
    }
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializer => "initializer",
            Self::Coder => "coder",
            Self::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub session_index: u32,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
    pub summary: String,
}

impl ProgressEntry {
    pub fn new(session_index: u32, kind: EntryKind, summary: impl Into<String>) -> Self {
        Self {
            session_index,
            timestamp: format_timestamp(Utc::now()),
            kind,
            task_id: None,
            outcome: None,
            summary: summary.into(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_outcome(mut self, outcome: SessionOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Handle on `.baton/progress.jsonl`. Only appends and reads exist.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry at the end. All-or-nothing per entry.
    #[instrument(skip_all, fields(session_index = entry.session_index, kind = entry.kind.as_str()))]
    pub fn append(&self, entry: &ProgressEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("serialize journal entry")?;
        line.push('\n');
        self.append_line(line.as_bytes())
            .map_err(|err| BatonError::persistence(&self.path, err))?;
        debug!("journal entry appended");
        Ok(())
    }

    fn append_line(&self, line: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        match unterminated_tail(&self.path)? {
            Tail::Clean => {}
            Tail::MissingNewline => file.write_all(b"\n")?,
            // A torn tail left by a crash never was an entry.
            Tail::Torn { keep } => {
                warn!(keep, "discarding torn journal tail before append");
                file.set_len(keep)?;
            }
        }
        file.write_all(line)?;
        file.sync_data()
    }

    /// Every complete entry, oldest first.
    pub fn entries(&self) -> Result<Vec<ProgressEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read journal {}", self.path.display()))?;
        parse_entries(&contents).with_context(|| format!("parse {}", self.path.display()))
    }

    /// Most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<ProgressEntry>> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    /// One past the highest recorded session index (1 for an empty journal).
    pub fn next_session_index(&self) -> Result<u32> {
        let last = self
            .entries()?
            .iter()
            .map(|entry| entry.session_index)
            .max()
            .unwrap_or(0);
        Ok(last + 1)
    }
}

enum Tail {
    Clean,
    /// A complete entry whose newline never reached the disk.
    MissingNewline,
    Torn { keep: u64 },
}

fn unterminated_tail(path: &Path) -> std::io::Result<Tail> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.last() == Some(&b'\n') {
        return Ok(Tail::Clean);
    }
    let keep = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |pos| pos + 1);
    if serde_json::from_slice::<ProgressEntry>(&bytes[keep..]).is_ok() {
        return Ok(Tail::MissingNewline);
    }
    Ok(Tail::Torn { keep: keep as u64 })
}

/// Parse JSON Lines. A malformed final line is a torn write and is skipped;
/// a malformed line anywhere else is corruption.
pub fn parse_entries(contents: &str) -> Result<Vec<ProgressEntry>> {
    let lines: Vec<&str> = contents.lines().collect();
    let mut entries = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ProgressEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) if index + 1 == lines.len() => {
                warn!(err = %err, "ignoring torn final journal line");
            }
            Err(err) => {
                return Err(anyhow!("journal line {} is corrupt: {err}", index + 1));
            }
        }
    }
    Ok(entries)
}
