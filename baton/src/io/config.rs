//! Orchestrator configuration stored under `.baton/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatonConfig {
    /// Sessions a task may consume before it is blocked.
    pub max_attempts_per_task: u32,

    /// Journal entries shown in the bootstrap context.
    pub bootstrap_journal_window: usize,

    /// Checkpoints shown in the bootstrap context.
    pub bootstrap_checkpoint_window: usize,

    /// Upper bound on sessions for one `baton run`.
    pub max_sessions: u32,

    /// Agent invocations allowed within one session.
    pub max_turns_per_session: u32,

    /// Initializer sessions tried before giving up.
    pub max_initializer_sessions: u32,

    /// Wall-clock budget for one session (all agent turns and tool calls).
    pub session_timeout_secs: u64,

    /// Default timeout for a single tool call.
    pub tool_timeout_secs: u64,

    /// Truncate captured child output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Prompt size before droppable sections are removed.
    pub prompt_budget_bytes: usize,

    /// Environment bring-up script, relative to the sandbox root.
    pub init_script: String,

    pub init_script_timeout_secs: u64,

    pub agent: AgentConfig,

    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that runs one agent turn (prompt on stdin, JSON to `$BATON_OUTPUT`).
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["baton-agent".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Command that checks one task (exit 0 means the task's checks pass).
    pub command: Vec<String>,

    pub timeout_secs: u64,

    /// A pre-check that already passes is a mismatch.
    pub require_failing_precheck: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: vec!["sh".to_string(), "verify.sh".to_string()],
            timeout_secs: 10 * 60,
            require_failing_precheck: true,
        }
    }
}

impl Default for BatonConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_task: 50,
            bootstrap_journal_window: 5,
            bootstrap_checkpoint_window: 5,
            max_sessions: 1000,
            max_turns_per_session: 20,
            max_initializer_sessions: 3,
            session_timeout_secs: 30 * 60,
            tool_timeout_secs: 30,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 60_000,
            init_script: "init.sh".to_string(),
            init_script_timeout_secs: 5 * 60,
            agent: AgentConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

impl BatonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts_per_task == 0 {
            return Err(anyhow!("max_attempts_per_task must be > 0"));
        }
        if self.max_sessions == 0 {
            return Err(anyhow!("max_sessions must be > 0"));
        }
        if self.max_turns_per_session == 0 {
            return Err(anyhow!("max_turns_per_session must be > 0"));
        }
        if self.max_initializer_sessions == 0 {
            return Err(anyhow!("max_initializer_sessions must be > 0"));
        }
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be > 0"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.init_script.trim().is_empty() || Path::new(&self.init_script).is_absolute() {
            return Err(anyhow!("init_script must be a relative path"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.verify.command.is_empty() || self.verify.command[0].trim().is_empty() {
            return Err(anyhow!("verify.command must be a non-empty array"));
        }
        if self.verify.timeout_secs == 0 {
            return Err(anyhow!("verify.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BatonConfig::default()`.
pub fn load_config(path: &Path) -> Result<BatonConfig> {
    if !path.exists() {
        let cfg = BatonConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BatonConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BatonConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
