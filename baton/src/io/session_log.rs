//! Per-session log files under `.baton/sessions/<n>/`.
//!
//! Everything here is ignored by git and exists for the operator. Losing a
//! session log never affects orchestrator state.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{SessionKind, SessionOutcome, ToolCall, ToolResult, VerifyOutcome};
use crate::io::process::truncate_to_boundary;

#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub session_index: u32,
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Attempt number this session consumed for its task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub outcome: SessionOutcome,
    pub verify_pre: VerifyOutcome,
    pub verify_post: VerifyOutcome,
    pub turns: u32,
    pub tool_calls: u32,
    /// Gate rejections, formatted as `Kind: message`.
    pub violations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub schema_path: PathBuf,
    pub tools_log_path: PathBuf,
    pub verify_pre_log_path: PathBuf,
    pub verify_post_log_path: PathBuf,
    pub environment_log_path: PathBuf,
    pub error_log_path: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            meta_path: dir.join("meta.json"),
            schema_path: dir.join("agent_turn.schema.json"),
            tools_log_path: dir.join("tools.log"),
            verify_pre_log_path: dir.join("verify-pre.log"),
            verify_post_log_path: dir.join("verify-post.log"),
            environment_log_path: dir.join("environment.log"),
            error_log_path: dir.join("error.log"),
            dir,
        }
    }

    pub fn prompt_path(&self, turn: u32) -> PathBuf {
        self.dir.join(format!("prompt-{turn}.md"))
    }

    pub fn agent_log_path(&self, turn: u32) -> PathBuf {
        self.dir.join(format!("agent-{turn}.log"))
    }

    pub fn output_path(&self, turn: u32) -> PathBuf {
        self.dir.join(format!("output-{turn}.json"))
    }

    /// Create the directory, clearing leftovers from an interrupted session with the same index.
    pub fn prepare(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("clear session dir {}", self.dir.display()))?;
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create session dir {}", self.dir.display()))
    }
}

pub fn write_meta(paths: &SessionPaths, meta: &SessionMeta) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(meta).context("serialize session meta")?;
    buf.push('\n');
    write_text(&paths.meta_path, &buf)
}

pub fn write_prompt(paths: &SessionPaths, turn: u32, prompt: &str) -> Result<()> {
    write_text(&paths.prompt_path(turn), prompt)
}

/// Append one tool call and its result to `tools.log`.
pub fn append_tool_log(
    paths: &SessionPaths,
    turn: u32,
    call: &ToolCall,
    result: &ToolResult,
    limit: usize,
) -> Result<()> {
    let request = serde_json::to_string(call).context("serialize tool call")?;
    let status = match &result.error {
        Some(kind) => format!("rejected ({kind})"),
        None if result.ok => "ok".to_string(),
        None => "failed".to_string(),
    };
    let output = truncate_to_boundary(&result.output, limit);
    let entry = format!("--- turn {turn} {} {status}\n{request}\n{output}\n", result.tool);
    append_text(&paths.tools_log_path, &entry)
}

pub fn write_error(paths: &SessionPaths, err: &anyhow::Error) -> Result<()> {
    write_text(&paths.error_log_path, &format!("{err:#}\n"))
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn append_text(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}
