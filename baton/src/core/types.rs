//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between the orchestrator, the external
//! agent and the journal. They must serialize identically across runs.

use serde::{Deserialize, Serialize};

use crate::task::NewTask;

/// Which kind of session a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Initializer,
    Coder,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializer => "initializer",
            Self::Coder => "coder",
        }
    }
}

/// How a session ended. Recorded in the journal and session metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionOutcome {
    /// Work verified and checkpointed.
    Committed,
    /// Nothing accepted this cycle; the task stays open.
    NoOp,
    /// The selected task spent its retry budget and is now blocked.
    LoopExceeded,
    /// Agent invocation failed; uncommitted work was discarded.
    Aborted,
}

impl SessionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::NoOp => "no-op",
            Self::LoopExceeded => "loop-exceeded",
            Self::Aborted => "aborted",
        }
    }
}

/// Result of one external verification run.
///
/// `Fail` also covers a verifier that could not complete (spawn error, timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyOutcome {
    Pass,
    Fail,
    /// Not run (e.g. the agent never claimed the task).
    Skipped,
}

/// Orchestrator state machine positions, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    Uninitialized,
    Initializing,
    Selecting,
    Working,
    Verifying,
    Committing,
    Completed,
    Blocked,
}

/// One action requested by the agent. Every variant is mediated by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        contents: String,
    },
    Shell {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    GitLog {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    GitStatus,
    GitDiff,
    CreateTasks {
        tasks: Vec<NewTask>,
    },
    MarkPassed {
        task_id: String,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "read_file",
            Self::WriteFile { .. } => "write_file",
            Self::Shell { .. } => "shell",
            Self::GitLog { .. } => "git_log",
            Self::GitStatus => "git_status",
            Self::GitDiff => "git_diff",
            Self::CreateTasks { .. } => "create_tasks",
            Self::MarkPassed { .. } => "mark_passed",
        }
    }

    /// Short human-readable form for transcripts. Omits file contents.
    pub fn label(&self) -> String {
        match self {
            Self::ReadFile { path } => format!("read_file {path}"),
            Self::WriteFile { path, contents } => {
                format!("write_file {path} ({} bytes)", contents.len())
            }
            Self::Shell { command, cwd, .. } => match cwd {
                Some(cwd) => format!("shell (in {cwd}) `{command}`"),
                None => format!("shell `{command}`"),
            },
            Self::GitLog { limit } => match limit {
                Some(limit) => format!("git_log {limit}"),
                None => "git_log".to_string(),
            },
            Self::GitStatus => "git_status".to_string(),
            Self::GitDiff => "git_diff".to_string(),
            Self::CreateTasks { tasks } => format!("create_tasks ({} tasks)", tasks.len()),
            Self::MarkPassed { task_id } => format!("mark_passed {task_id}"),
        }
    }
}

/// Structured output of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTurn {
    pub summary: String,
    /// The agent is finished with this session.
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub actions: Vec<ToolCall>,
}

/// Result of one tool call, replayed to the agent on its next turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub ok: bool,
    pub output: String,
    /// Error taxonomy name when the gate rejected the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool: &str, output: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            ok: true,
            output: output.into(),
            error: None,
        }
    }

    /// The call ran but did not succeed (missing file, non-zero exit).
    pub fn unsuccessful(tool: &str, output: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            ok: false,
            output: output.into(),
            error: None,
        }
    }

    /// The gate rejected the call; `error` is the taxonomy name.
    pub fn failed(tool: &str, error: &str, output: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            ok: false,
            output: output.into(),
            error: Some(error.to_string()),
        }
    }
}

/// One tool call paired with what the gate returned for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Everything that happened in one agent turn, replayed on later turns of the same session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptTurn {
    pub turn: u32,
    pub summary: String,
    pub exchanges: Vec<ToolExchange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_omit_file_contents() {
        let call = ToolCall::WriteFile {
            path: "src/app.js".to_string(),
            contents: "x".repeat(40),
        };
        assert_eq!(call.label(), "write_file src/app.js (40 bytes)");
        let shell = ToolCall::Shell {
            command: "npm test".to_string(),
            cwd: Some("web".to_string()),
            timeout_secs: None,
        };
        assert_eq!(shell.label(), "shell (in web) `npm test`");
    }

    #[test]
    fn tool_calls_parse_from_tagged_json() {
        let raw = r#"[
            {"tool": "write_file", "path": "a.txt", "contents": "hi"},
            {"tool": "shell", "command": "ls"},
            {"tool": "git_status"},
            {"tool": "mark_passed", "task_id": "T1"}
        ]"#;
        let calls: Vec<ToolCall> = serde_json::from_str(raw).expect("parse");
        assert_eq!(calls[0].name(), "write_file");
        assert_eq!(
            calls[1],
            ToolCall::Shell {
                command: "ls".to_string(),
                cwd: None,
                timeout_secs: None
            }
        );
        assert_eq!(calls[2], ToolCall::GitStatus);
        assert_eq!(calls[3].name(), "mark_passed");
    }

    #[test]
    fn agent_turn_defaults_missing_fields() {
        let turn: AgentTurn = serde_json::from_str(r#"{"summary": "thinking"}"#).expect("parse");
        assert!(!turn.done);
        assert!(turn.actions.is_empty());
    }

    #[test]
    fn session_outcome_serializes_kebab_case() {
        let json = serde_json::to_string(&SessionOutcome::LoopExceeded).expect("serialize");
        assert_eq!(json, "\"loop-exceeded\"");
        assert_eq!(SessionOutcome::NoOp.as_str(), "no-op");
    }
}
