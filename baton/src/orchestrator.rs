//! The session state machine behind `baton step` and `baton run`.
//!
//! Every cycle starts from the durable stores alone: the registry and journal
//! decide whether the project still needs an Initializer, which task a Coder
//! works next, or whether the run is over.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::selector::{SelectedTask, Selection, select_task};
use crate::core::types::{OrchestratorState, SessionOutcome};
use crate::error::BatonError;
use crate::io::agent::Agent;
use crate::io::checkpoint::CheckpointManager;
use crate::io::config::BatonConfig;
use crate::io::init::{BatonPaths, ensure_gitignore};
use crate::io::journal::{EntryKind, Journal, ProgressEntry};
use crate::io::registry_store::load_registry;
use crate::io::verifier::Verifier;
use crate::session::{SessionReport, SessionRunner};

/// Session logs are the only thing allowed to differ from the last checkpoint.
const SESSION_LOG_PREFIX: &str = ".baton/sessions/";

/// Why the orchestrator stopped starting sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum StopReason {
    /// Every task passes.
    Completed,
    /// Only blocked tasks remain open.
    Blocked { ids: Vec<String> },
    /// The session limit was reached with work left.
    MaxSessions,
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            Self::Completed => "completed: every task passes".to_string(),
            Self::Blocked { ids } => {
                format!("blocked: {} exhausted their attempts", ids.join(", "))
            }
            Self::MaxSessions => "stopped at the session limit with work remaining".to_string(),
        }
    }
}

/// What the next cycle would do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Initialize,
    Code(SelectedTask),
    Stop(StopReason),
}

impl Plan {
    pub fn state(&self) -> OrchestratorState {
        match self {
            Self::Initialize => OrchestratorState::Uninitialized,
            Self::Code(_) => OrchestratorState::Selecting,
            Self::Stop(StopReason::Completed) => OrchestratorState::Completed,
            Self::Stop(StopReason::Blocked { .. }) => OrchestratorState::Blocked,
            Self::Stop(StopReason::MaxSessions) => OrchestratorState::Selecting,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StepResult {
    Ran(Box<SessionReport>),
    Stopped(StopReason),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub sessions: u32,
    pub stop: StopReason,
}

/// True once an Initializer produced tasks and the environment script.
///
/// A committed Initializer entry also counts, so deleting the init script
/// later does not send the project back to initialization.
pub fn is_initialized(
    paths: &BatonPaths,
    config: &BatonConfig,
    journal: &[ProgressEntry],
) -> Result<bool> {
    let registry = load_registry(&paths.registry_path)?;
    if registry.is_empty() {
        return Ok(false);
    }
    let script = paths.init_script_path(config).is_file();
    let committed = journal.iter().any(|entry| {
        entry.kind == EntryKind::Initializer && entry.outcome == Some(SessionOutcome::Committed)
    });
    Ok(script || committed)
}

/// Decide the next cycle from the stores. Never writes.
pub fn plan_next(paths: &BatonPaths, config: &BatonConfig) -> Result<Plan> {
    let journal = Journal::new(&paths.journal_path).entries()?;
    if !is_initialized(paths, config, &journal)? {
        let runs = journal
            .iter()
            .filter(|entry| entry.kind == EntryKind::Initializer)
            .count();
        if runs >= config.max_initializer_sessions as usize {
            return Err(BatonError::InitializationRequired {
                reason: format!(
                    "{runs} initializer sessions did not produce both a task registry and {}",
                    config.init_script
                ),
            }
            .into());
        }
        return Ok(Plan::Initialize);
    }

    let registry = load_registry(&paths.registry_path)?;
    Ok(match select_task(&registry, config.max_attempts_per_task) {
        Selection::Uninitialized => Plan::Initialize,
        Selection::Open(task) => Plan::Code(task),
        Selection::Complete => Plan::Stop(StopReason::Completed),
        Selection::Blocked { ids } => Plan::Stop(StopReason::Blocked { ids }),
    })
}

/// Refuse to start unless HEAD is a checkpoint and the tree matches it.
pub fn preflight(paths: &BatonPaths) -> Result<()> {
    let checkpoints = CheckpointManager::new(&paths.root);
    let head = checkpoints.head()?.ok_or_else(|| BatonError::InitializationRequired {
        reason: "the repository has no commits (run `baton init`)".to_string(),
    })?;
    ensure_gitignore(paths)?;
    checkpoints
        .git()
        .ensure_clean_except_prefixes(&[SESSION_LOG_PREFIX])
        .with_context(|| {
            format!(
                "refusing to start: last checkpoint is {} ({}); inspect the changes, then commit them or run `baton revert {}`",
                head.short_id(),
                head.message,
                head.short_id()
            )
        })
}

pub struct Orchestrator<'a> {
    paths: &'a BatonPaths,
    config: &'a BatonConfig,
    sessions: SessionRunner<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        paths: &'a BatonPaths,
        config: &'a BatonConfig,
        agent: &'a dyn Agent,
        verifier: &'a dyn Verifier,
    ) -> Self {
        Self {
            paths,
            config,
            sessions: SessionRunner::new(paths, config, agent, verifier),
        }
    }

    /// Run at most one session.
    #[instrument(skip_all)]
    pub fn step(&self) -> Result<StepResult> {
        preflight(self.paths)?;
        let plan = plan_next(self.paths, self.config)?;
        let index = Journal::new(&self.paths.journal_path).next_session_index()?;
        let report = match plan {
            Plan::Stop(stop) => {
                info!(stop = ?stop, "nothing left to run");
                return Ok(StepResult::Stopped(stop));
            }
            Plan::Initialize => {
                info!(session = index, "starting initializer session");
                self.sessions.run_initializer(index)?
            }
            Plan::Code(task) => {
                info!(
                    session = index,
                    task_id = %task.id,
                    attempt = task.attempts + 1,
                    max_attempts = task.max_attempts,
                    "starting coder session"
                );
                self.sessions.run_coder(index, &task.id)?
            }
        };
        if report.outcome == SessionOutcome::LoopExceeded {
            warn!(task_id = ?report.task_id, "task blocked after exhausting its attempts");
        }
        Ok(StepResult::Ran(Box::new(report)))
    }

    /// Run sessions until the project completes, blocks, or `max_sessions` have run.
    ///
    /// Stops immediately on errors outside a session (dirty tree, unreadable
    /// stores, failed initialization).
    pub fn run<F: FnMut(&SessionReport)>(
        &self,
        max_sessions: u32,
        mut on_session: F,
    ) -> Result<RunOutcome> {
        let mut sessions = 0u32;
        loop {
            if sessions >= max_sessions {
                let stop = match plan_next(self.paths, self.config)? {
                    Plan::Stop(stop) => stop,
                    Plan::Initialize | Plan::Code(_) => StopReason::MaxSessions,
                };
                return Ok(RunOutcome { sessions, stop });
            }
            match self.step()? {
                StepResult::Ran(report) => {
                    sessions += 1;
                    on_session(report.as_ref());
                }
                StepResult::Stopped(stop) => return Ok(RunOutcome { sessions, stop }),
            }
        }
    }
}
