//! One agent session, from bootstrap to checkpoint.
//!
//! Both session kinds follow the same shape: prepare the session directory,
//! bring the environment up, drive the agent for up to `max_turns_per_session`
//! turns with every tool call mediated by the gate, then record the outcome in
//! the journal and commit a checkpoint. A Coder session additionally records
//! an attempt before the agent starts and runs red/green verification around
//! the agent's work. When a Coder session ends without a verified pass its
//! workspace changes are discarded too, so a later attempt starts from red.
//!
//! A session that fails mid-way (agent crash, timeout, persistence error) is
//! aborted: its uncommitted work is discarded, the attempt count and journal
//! are carried forward, and a recovery checkpoint is committed.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::bootstrap::{Assembler, BootstrapContext};
use crate::core::outcome::{SessionEvidence, judge_coder_session};
use crate::core::types::{
    OrchestratorState, SessionKind, SessionOutcome, ToolExchange, TranscriptTurn, VerifyOutcome,
};
use crate::error::BatonError;
use crate::guardrail::Gate;
use crate::io::agent::{Agent, AgentRequest, invoke_and_load, write_turn_schema};
use crate::io::checkpoint::{Checkpoint, CheckpointManager};
use crate::io::config::BatonConfig;
use crate::io::environment::{EnvironmentStatus, bring_up};
use crate::io::init::BatonPaths;
use crate::io::journal::{Journal, ProgressEntry, format_timestamp};
use crate::io::process::truncate_to_boundary;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::registry_store::{load_registry, write_registry};
use crate::io::session_log::{
    SessionMeta, SessionPaths, append_tool_log, write_error, write_meta, write_prompt,
};
use crate::io::verifier::{Verifier, VerifyPhase, VerifyRequest, verify_if_claimed};
use crate::recovery::discard_session_work;
use crate::task::Task;
use crate::tools::ToolRunner;

/// Cap on the abort reason copied into the journal; the full error is in `error.log`.
const ABORT_SUMMARY_LIMIT: usize = 2_000;

/// What one session did, as reported to the orchestrator and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub index: u32,
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub outcome: SessionOutcome,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<String>,
    pub violations: Vec<String>,
    pub checkpoint: Checkpoint,
    /// Why the session was aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the turn loop observed.
#[derive(Debug, Default)]
struct TurnLog {
    turns: u32,
    tool_calls: u32,
    violations: Vec<String>,
    last_summary: Option<String>,
    done: bool,
}

/// Result of the fallible part of a session, before journaling.
struct Worked {
    outcome: SessionOutcome,
    log: TurnLog,
    pre: VerifyOutcome,
    post: VerifyOutcome,
    mismatch: Option<String>,
    notes: Vec<String>,
}

/// Runs sessions against one project with one agent and verifier backend.
pub struct SessionRunner<'a> {
    paths: &'a BatonPaths,
    config: &'a BatonConfig,
    agent: &'a dyn Agent,
    verifier: &'a dyn Verifier,
}

impl<'a> SessionRunner<'a> {
    pub fn new(
        paths: &'a BatonPaths,
        config: &'a BatonConfig,
        agent: &'a dyn Agent,
        verifier: &'a dyn Verifier,
    ) -> Self {
        Self {
            paths,
            config,
            agent,
            verifier,
        }
    }

    /// Run an Initializer session: turn the application spec into tasks and an init script.
    #[instrument(skip_all, fields(session = index))]
    pub fn run_initializer(&self, index: u32) -> Result<SessionReport> {
        let started = Utc::now();
        let clock = Instant::now();
        let session = self.prepare(index)?;
        enter(OrchestratorState::Initializing);
        let environment = self.bring_up_environment(&session)?;

        let worked = (|| -> Result<Worked> {
            let context = Assembler::new(self.paths, self.config)
                .assemble(SessionKind::Initializer, environment)?;
            let registry = load_registry(&self.paths.registry_path)?;
            let gate = Gate::new(&self.paths.root, SessionKind::Initializer, None, registry)?;
            let mut runner = ToolRunner::new(gate, self.paths, self.config);
            let log = self.drive_turns(index, &session, &context, None, &mut runner, clock)?;

            let registry = runner.into_gate().into_registry();
            let script = self.paths.init_script_path(self.config);
            let mut notes = Vec::new();
            if registry.is_empty() {
                notes.push("the task registry is still empty".to_string());
            }
            if !script.is_file() {
                notes.push(format!("{} was not created", self.config.init_script));
            }
            let outcome = if notes.is_empty() {
                SessionOutcome::Committed
            } else {
                warn!(notes = ?notes, "initializer left the project uninitialized");
                SessionOutcome::NoOp
            };
            Ok(Worked {
                outcome,
                log,
                pre: VerifyOutcome::Skipped,
                post: VerifyOutcome::Skipped,
                mismatch: None,
                notes,
            })
        })();

        let pending = PendingSession {
            index,
            kind: SessionKind::Initializer,
            task_id: None,
            attempt: None,
            started_at: format_timestamp(started),
            clock,
        };
        match worked {
            Ok(worked) => self.finish(&session, pending, worked),
            Err(err) => self.abort(&session, pending, err),
        }
    }

    /// Run a Coder session on `task_id`. The attempt is recorded before the agent starts.
    #[instrument(skip_all, fields(session = index, task_id = %task_id))]
    pub fn run_coder(&self, index: u32, task_id: &str) -> Result<SessionReport> {
        let started = Utc::now();
        let clock = Instant::now();
        let session = self.prepare(index)?;

        let mut registry = load_registry(&self.paths.registry_path)?;
        let attempt = registry.record_attempt(task_id)?;
        write_registry(&self.paths.registry_path, &registry)?;
        info!(attempt, max_attempts = self.config.max_attempts_per_task, "attempt recorded");

        let environment = self.bring_up_environment(&session)?;

        let worked = (|| -> Result<Worked> {
            let context = Assembler::new(self.paths, self.config)
                .assemble(SessionKind::Coder, environment)?;
            let task = context
                .task(task_id)
                .cloned()
                .ok_or_else(|| BatonError::NotFound {
                    id: task_id.to_string(),
                })?;

            let pre = if self.config.verify.require_failing_precheck {
                self.verifier
                    .verify(&self.verify_request(&session, &task, VerifyPhase::Pre))?
            } else {
                VerifyOutcome::Skipped
            };

            let gate = Gate::new(
                &self.paths.root,
                SessionKind::Coder,
                Some(task_id.to_string()),
                registry,
            )?;
            let mut runner = ToolRunner::new(gate, self.paths, self.config);
            enter(OrchestratorState::Working);
            let log = self.drive_turns(index, &session, &context, Some(&task), &mut runner, clock)?;

            enter(OrchestratorState::Verifying);
            let claimed = runner.gate().claimed();
            let post = verify_if_claimed(
                claimed,
                self.verifier,
                &self.verify_request(&session, &task, VerifyPhase::Post),
            )?;
            let verdict = judge_coder_session(&SessionEvidence {
                claimed,
                pre,
                post,
                attempts: attempt,
                max_attempts: self.config.max_attempts_per_task,
                require_failing_precheck: self.config.verify.require_failing_precheck,
            });

            let mut registry = runner.into_gate().into_registry();
            if verdict.mark_passed {
                registry.mark_passed(task_id)?;
            }
            write_registry(&self.paths.registry_path, &registry)?;

            let mismatch = verdict.mismatch.map(|detail| {
                let err = BatonError::VerificationMismatch {
                    id: task_id.to_string(),
                    detail,
                };
                warn!(err = %err, "verification mismatch");
                err.to_string()
            });
            let mut notes = Vec::new();
            if !log.done {
                notes.push(format!(
                    "agent did not finish within {} turns",
                    self.config.max_turns_per_session
                ));
            }
            if verdict.outcome == SessionOutcome::LoopExceeded {
                let err = BatonError::LoopExceeded {
                    id: task_id.to_string(),
                    attempts: attempt,
                    max_attempts: self.config.max_attempts_per_task,
                };
                warn!(err = %err, "task blocked");
                notes.push(err.to_string());
            }
            Ok(Worked {
                outcome: verdict.outcome,
                log,
                pre,
                post,
                mismatch,
                notes,
            })
        })();

        let pending = PendingSession {
            index,
            kind: SessionKind::Coder,
            task_id: Some(task_id.to_string()),
            attempt: Some(attempt),
            started_at: format_timestamp(started),
            clock,
        };
        match worked {
            Ok(worked) => self.finish(&session, pending, worked),
            Err(err) => self.abort(&session, pending, err),
        }
    }

    fn prepare(&self, index: u32) -> Result<SessionPaths> {
        let session = SessionPaths::new(self.paths.session_dir(index));
        session.prepare()?;
        write_turn_schema(&session.schema_path)?;
        Ok(session)
    }

    fn bring_up_environment(&self, session: &SessionPaths) -> Result<EnvironmentStatus> {
        bring_up(
            &self.paths.root,
            &self.paths.init_script_path(self.config),
            Duration::from_secs(self.config.init_script_timeout_secs),
            &session.environment_log_path,
        )
    }

    fn verify_request(
        &self,
        session: &SessionPaths,
        task: &Task,
        phase: VerifyPhase,
    ) -> VerifyRequest {
        let log_path = match phase {
            VerifyPhase::Pre => session.verify_pre_log_path.clone(),
            VerifyPhase::Post => session.verify_post_log_path.clone(),
        };
        VerifyRequest {
            workdir: self.paths.root.clone(),
            task: task.clone(),
            phase,
            log_path,
            timeout: Duration::from_secs(self.config.verify.timeout_secs),
            output_limit_bytes: self.config.output_limit_bytes,
        }
    }

    /// Invoke the agent until it reports done or the turn limit is reached.
    fn drive_turns(
        &self,
        index: u32,
        session: &SessionPaths,
        context: &BootstrapContext,
        selected: Option<&Task>,
        runner: &mut ToolRunner,
        clock: Instant,
    ) -> Result<TurnLog> {
        let deadline = clock + self.config.session_timeout();
        let builder = PromptBuilder::new(self.config.prompt_budget_bytes);
        let max_turns = self.config.max_turns_per_session;
        let mut transcript: Vec<TranscriptTurn> = Vec::new();
        let mut log = TurnLog::default();

        for turn in 1..=max_turns {
            let timeout = remaining_budget(deadline)?;
            let prompt = builder.build(&PromptInputs {
                context,
                selected,
                transcript: &transcript,
                turn,
                max_turns,
            })?;
            write_prompt(session, turn, &prompt)?;

            let request = AgentRequest {
                workdir: self.paths.root.clone(),
                prompt,
                output_schema_path: session.schema_path.clone(),
                output_path: session.output_path(turn),
                log_path: session.agent_log_path(turn),
                timeout,
                output_limit_bytes: self.config.output_limit_bytes,
                kind: context.kind,
                session_index: index,
                turn,
            };
            let agent_turn = invoke_and_load(self.agent, &request)
                .with_context(|| format!("agent turn {turn}"))?;
            log.turns = turn;

            let mut exchanges = Vec::with_capacity(agent_turn.actions.len());
            for call in agent_turn.actions {
                let result = runner.execute(&call)?;
                append_tool_log(session, turn, &call, &result, self.config.output_limit_bytes)?;
                log.tool_calls += 1;
                if let Some(kind) = &result.error {
                    log.violations.push(format!("{kind}: {}", result.output));
                }
                exchanges.push(ToolExchange { call, result });
            }
            info!(
                turn,
                tool_calls = exchanges.len(),
                done = agent_turn.done,
                "agent turn finished"
            );

            log.last_summary = Some(agent_turn.summary.clone());
            if agent_turn.done {
                log.done = true;
                break;
            }
            transcript.push(TranscriptTurn {
                turn,
                summary: agent_turn.summary,
                exchanges,
            });
        }
        Ok(log)
    }

    /// Journal and checkpoint a session that ran to completion.
    fn finish(
        &self,
        session: &SessionPaths,
        pending: PendingSession,
        worked: Worked,
    ) -> Result<SessionReport> {
        let mut parts = vec![
            worked
                .log
                .last_summary
                .clone()
                .unwrap_or_else(|| "agent produced no summary".to_string()),
        ];
        parts.extend(worked.mismatch.clone());
        parts.extend(worked.notes.iter().cloned());
        if !worked.log.violations.is_empty() {
            parts.push(format!("rejected tool calls: {}", worked.log.violations.join("; ")));
        }
        let summary = parts.join("\n");

        // Only verified work reaches a checkpoint; attempts and the journal always do.
        if pending.kind == SessionKind::Coder && worked.outcome != SessionOutcome::Committed {
            discard_session_work(self.paths, true)?;
        }

        let tag = match worked.outcome {
            SessionOutcome::Committed => pending.task_id.as_deref(),
            _ => None,
        };
        let checkpoint = self.record(&pending, worked.outcome, &summary, tag)?;
        self.write_session_meta(session, &pending, &worked, &checkpoint)?;
        info!(
            outcome = worked.outcome.as_str(),
            checkpoint = checkpoint.short_id(),
            "session finished"
        );
        Ok(SessionReport {
            index: pending.index,
            kind: pending.kind,
            task_id: pending.task_id,
            attempt: pending.attempt,
            outcome: worked.outcome,
            summary,
            mismatch: worked.mismatch,
            violations: worked.log.violations,
            checkpoint,
            error: None,
        })
    }

    /// Discard the session's work, keep attempts and the journal, and commit the recovery.
    fn abort(
        &self,
        session: &SessionPaths,
        pending: PendingSession,
        err: anyhow::Error,
    ) -> Result<SessionReport> {
        warn!(err = %format!("{err:#}"), "session aborted");
        write_error(session, &err)?;
        discard_session_work(self.paths, pending.kind == SessionKind::Coder)?;

        let reason = format!("{err:#}");
        let mut summary = format!(
            "session aborted: {}",
            truncate_to_boundary(&reason, ABORT_SUMMARY_LIMIT)
        );
        let mut notes = Vec::new();
        if let (Some(task_id), Some(attempt)) = (&pending.task_id, pending.attempt) {
            if attempt >= self.config.max_attempts_per_task {
                let err = BatonError::LoopExceeded {
                    id: task_id.clone(),
                    attempts: attempt,
                    max_attempts: self.config.max_attempts_per_task,
                };
                warn!(err = %err, "task blocked");
                summary.push('\n');
                summary.push_str(&err.to_string());
                notes.push(err.to_string());
            }
        }
        let checkpoint = self.record(&pending, SessionOutcome::Aborted, &summary, None)?;
        let worked = Worked {
            outcome: SessionOutcome::Aborted,
            log: TurnLog::default(),
            pre: VerifyOutcome::Skipped,
            post: VerifyOutcome::Skipped,
            mismatch: None,
            notes,
        };
        self.write_session_meta(session, &pending, &worked, &checkpoint)?;
        Ok(SessionReport {
            index: pending.index,
            kind: pending.kind,
            task_id: pending.task_id,
            attempt: pending.attempt,
            outcome: SessionOutcome::Aborted,
            summary,
            mismatch: None,
            violations: Vec::new(),
            checkpoint,
            error: Some(reason),
        })
    }

    /// Append the journal entry, then commit everything as one checkpoint.
    fn record(
        &self,
        pending: &PendingSession,
        outcome: SessionOutcome,
        summary: &str,
        tag: Option<&str>,
    ) -> Result<Checkpoint> {
        enter(OrchestratorState::Committing);
        let mut entry = ProgressEntry::new(pending.index, pending.kind.into(), summary)
            .with_outcome(outcome);
        if let Some(task_id) = &pending.task_id {
            entry = entry.with_task(task_id.clone());
        }
        Journal::new(&self.paths.journal_path).append(&entry)?;

        let subject = match &pending.task_id {
            Some(task_id) => format!(
                "baton: session {} {} {task_id} {}",
                pending.index,
                pending.kind.as_str(),
                outcome.as_str()
            ),
            None => format!(
                "baton: session {} {} {}",
                pending.index,
                pending.kind.as_str(),
                outcome.as_str()
            ),
        };
        CheckpointManager::new(&self.paths.root)
            .commit(&subject, tag)
            .with_context(|| format!("checkpoint session {}", pending.index))
    }

    fn write_session_meta(
        &self,
        session: &SessionPaths,
        pending: &PendingSession,
        worked: &Worked,
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        let ended = Utc::now();
        write_meta(
            session,
            &SessionMeta {
                session_index: pending.index,
                kind: pending.kind,
                task_id: pending.task_id.clone(),
                attempt: pending.attempt,
                outcome: worked.outcome,
                verify_pre: worked.pre,
                verify_post: worked.post,
                turns: worked.log.turns,
                tool_calls: worked.log.tool_calls,
                violations: worked.log.violations.clone(),
                checkpoint: Some(checkpoint.commit_id.clone()),
                started_at: pending.started_at.clone(),
                ended_at: format_timestamp(ended),
                duration_ms: pending.clock.elapsed().as_millis() as u64,
            },
        )
    }
}

/// Identity of the session being recorded.
struct PendingSession {
    index: u32,
    kind: SessionKind,
    task_id: Option<String>,
    attempt: Option<u32>,
    /// RFC 3339.
    started_at: String,
    clock: Instant,
}

fn enter(state: OrchestratorState) {
    debug!(state = ?state, "session state");
}

fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("session timed out"));
    }
    Ok(remaining)
}
