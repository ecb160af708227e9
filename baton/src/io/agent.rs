//! Agent abstraction for one reasoning turn.
//!
//! The [`Agent`] trait decouples the session loop from the actual backend.
//! [`CommandAgent`] spawns the configured command; tests use scripted agents
//! that write predetermined turns without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{AgentTurn, SessionKind};
use crate::io::process::{run_command_with_timeout, write_bounded_log};

pub const AGENT_TURN_SCHEMA: &str = include_str!("../../schemas/agent_turn.schema.json");

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process (the sandbox root).
    pub workdir: PathBuf,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    /// JSON Schema that constrains the agent's output.
    pub output_schema_path: PathBuf,
    /// Where the agent must write its output JSON.
    pub output_path: PathBuf,
    /// Where agent stdout/stderr is logged.
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub kind: SessionKind,
    pub session_index: u32,
    /// 1-based turn within the session.
    pub turn: u32,
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Run one turn. Must write an [`AgentTurn`] document to `request.output_path`.
    fn invoke(&self, request: &AgentRequest) -> Result<()>;
}

/// Agent that spawns a configured command.
///
/// The prompt arrives on stdin. `BATON_OUTPUT` (also the final argument) names
/// the output file and `BATON_OUTPUT_SCHEMA` the schema it must satisfy.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(session = request.session_index, turn = request.turn, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent.command is empty"))?;
        info!(program = %program, kind = request.kind.as_str(), "starting agent turn");

        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&request.output_path)
            .current_dir(&request.workdir)
            .env("BATON_OUTPUT", &request.output_path)
            .env("BATON_OUTPUT_SCHEMA", &request.output_schema_path)
            .env("BATON_SESSION_KIND", request.kind.as_str())
            .env("BATON_SESSION_INDEX", request.session_index.to_string())
            .env("BATON_TURN", request.turn.to_string());

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run agent command")?;

        write_bounded_log(
            &request.log_path,
            &output.render("agent"),
            request.output_limit_bytes,
        )?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!(
                "agent failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("agent turn completed");
        Ok(())
    }
}

/// Invoke the agent and load its validated output.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn invoke_and_load<A: Agent + ?Sized>(agent: &A, request: &AgentRequest) -> Result<AgentTurn> {
    if request.output_path.exists() {
        fs::remove_file(&request.output_path)
            .with_context(|| format!("remove stale output {}", request.output_path.display()))?;
    }
    agent.invoke(request)?;
    let turn = read_turn(&request.output_path)?;
    debug!(actions = turn.actions.len(), done = turn.done, "parsed agent turn");
    Ok(turn)
}

/// Write the output schema where the agent can find it.
pub fn write_turn_schema(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output schema dir {}", parent.display()))?;
    }
    fs::write(path, AGENT_TURN_SCHEMA)
        .with_context(|| format!("write output schema {}", path.display()))
}

fn read_turn(path: &Path) -> Result<AgentTurn> {
    if !path.exists() {
        return Err(anyhow!("missing agent output {}", path.display()));
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read agent output {}", path.display()))?;
    parse_turn(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Parse agent output JSON and check it against the turn schema.
pub fn parse_turn(contents: &str) -> Result<AgentTurn> {
    let value: Value = serde_json::from_str(contents).context("parse agent output json")?;
    let schema: Value = serde_json::from_str(AGENT_TURN_SCHEMA).context("parse turn schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile turn schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "agent output schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    serde_json::from_value(value).context("deserialize agent turn")
}
