//! Read-only project summary for `baton status`.

use anyhow::Result;
use serde::Serialize;

use crate::core::types::OrchestratorState;
use crate::io::checkpoint::{Checkpoint, CheckpointManager};
use crate::io::config::BatonConfig;
use crate::io::init::BatonPaths;
use crate::io::journal::{Journal, ProgressEntry};
use crate::io::registry_store::load_registry;
use crate::orchestrator::{Plan, StopReason, plan_next};
use crate::task::Task;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: OrchestratorState,
    /// Task the next Coder session would work on.
    pub next_task: Option<String>,
    pub passed: usize,
    pub total: usize,
    pub blocked: Vec<String>,
    pub max_attempts: u32,
    pub tasks: Vec<Task>,
    /// Newest last.
    pub recent_sessions: Vec<ProgressEntry>,
    pub head: Option<Checkpoint>,
    /// Why the next cycle cannot be planned, e.g. initialization gave up.
    pub problem: Option<String>,
}

pub fn project_status(paths: &BatonPaths, config: &BatonConfig) -> Result<StatusReport> {
    let registry = load_registry(&paths.registry_path)?;
    let recent_sessions = Journal::new(&paths.journal_path).tail(config.bootstrap_journal_window)?;
    let head = CheckpointManager::new(&paths.root).head()?;

    let (state, next_task, problem) = match plan_next(paths, config) {
        Ok(plan) => {
            let next = match &plan {
                Plan::Code(task) => Some(task.id.clone()),
                _ => None,
            };
            (plan.state(), next, None)
        }
        Err(err) => (OrchestratorState::Uninitialized, None, Some(format!("{err:#}"))),
    };
    let blocked = registry
        .blocked(config.max_attempts_per_task)
        .into_iter()
        .map(|task| task.id.clone())
        .collect();
    let completion = registry.completion();

    Ok(StatusReport {
        state,
        next_task,
        passed: completion.passed,
        total: completion.total,
        blocked,
        max_attempts: config.max_attempts_per_task,
        tasks: registry.into_tasks(),
        recent_sessions,
        head,
        problem,
    })
}

/// Plain-text rendering for the terminal.
pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("state: {}\n", state_label(report.state)));
    out.push_str(&format!("tasks: {}/{} passing\n", report.passed, report.total));
    if let Some(next) = &report.next_task {
        out.push_str(&format!("next: {next}\n"));
    }
    if !report.blocked.is_empty() {
        out.push_str(&format!(
            "blocked ({} attempts): {}\n",
            report.max_attempts,
            report.blocked.join(", ")
        ));
    }
    if let Some(head) = &report.head {
        out.push_str(&format!("checkpoint: {} {}\n", head.short_id(), head.message));
    }
    if let Some(problem) = &report.problem {
        out.push_str(&format!("problem: {problem}\n"));
    }
    if !report.tasks.is_empty() {
        out.push('\n');
        for task in &report.tasks {
            let mark = if task.passes { "x" } else { " " };
            out.push_str(&format!(
                "[{mark}] {} {} ({} attempts)\n",
                task.id, task.description, task.attempts
            ));
        }
    }
    if !report.recent_sessions.is_empty() {
        out.push('\n');
        for entry in &report.recent_sessions {
            let outcome = entry.outcome.map(|o| o.as_str()).unwrap_or("-");
            let task = entry.task_id.as_deref().unwrap_or("-");
            let headline = entry.summary.lines().next().unwrap_or_default();
            out.push_str(&format!(
                "#{} {} {task} {outcome}: {headline}\n",
                entry.session_index,
                entry.kind.as_str()
            ));
        }
    }
    out
}

fn state_label(state: OrchestratorState) -> &'static str {
    match state {
        OrchestratorState::Uninitialized => "uninitialized",
        OrchestratorState::Initializing => "initializing",
        OrchestratorState::Selecting => "ready",
        OrchestratorState::Working => "working",
        OrchestratorState::Verifying => "verifying",
        OrchestratorState::Committing => "committing",
        OrchestratorState::Completed => "completed",
        OrchestratorState::Blocked => "blocked",
    }
}

/// Exit status for a stop reason.
pub fn stop_exit_code(stop: &StopReason) -> i32 {
    match stop {
        StopReason::Completed => crate::exit_codes::OK,
        StopReason::Blocked { .. } => crate::exit_codes::BLOCKED,
        StopReason::MaxSessions => crate::exit_codes::MAX_SESSIONS,
    }
}
