//! Prompt builder for agent turns.
//!
//! Templates mark each section with `<!-- section:KEY required|droppable -->`.
//! Sections render in template order. When the prompt exceeds its byte budget
//! the journal and checkpoint lists are shortened to their most recent entries
//! first, then droppable sections go, then the last section is truncated.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::bootstrap::BootstrapContext;
use crate::core::types::{SessionKind, TranscriptTurn};
use crate::io::process::truncate_to_boundary;
use crate::task::Task;

const INITIALIZER_TEMPLATE: &str = include_str!("prompts/initializer.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");

/// Tool output replayed in the transcript is capped per call.
const TRANSCRIPT_OUTPUT_LIMIT: usize = 4_000;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

#[derive(Debug, Clone, Serialize)]
struct CheckpointView {
    id: String,
    message: String,
    task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ExchangeView {
    label: String,
    status: String,
    output: String,
}

#[derive(Debug, Clone, Serialize)]
struct TurnView {
    turn: u32,
    summary: String,
    exchanges: Vec<ExchangeView>,
}

fn transcript_views(transcript: &[TranscriptTurn]) -> Vec<TurnView> {
    transcript
        .iter()
        .map(|turn| TurnView {
            turn: turn.turn,
            summary: turn.summary.clone(),
            exchanges: turn
                .exchanges
                .iter()
                .map(|exchange| {
                    let result = &exchange.result;
                    let status = match &result.error {
                        Some(kind) => format!("rejected ({kind})"),
                        None if result.ok => "ok".to_string(),
                        None => "failed".to_string(),
                    };
                    let trimmed = result.output.trim_end();
                    let mut output =
                        truncate_to_boundary(trimmed, TRANSCRIPT_OUTPUT_LIMIT).to_string();
                    if output.len() < trimmed.len() {
                        output.push_str("\n[output truncated]");
                    }
                    ExchangeView {
                        label: exchange.call.label(),
                        status,
                        output,
                    }
                })
                .collect(),
        })
        .collect()
}

/// How many journal entries and checkpoints a rendering shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HistoryWindow {
    journal: usize,
    checkpoints: usize,
}

impl HistoryWindow {
    fn full(ctx: &BootstrapContext) -> Self {
        Self {
            journal: ctx.journal.len(),
            checkpoints: ctx.checkpoints.len(),
        }
    }

    /// Halve the longer list. False once neither list can lose another entry.
    fn shrink(&mut self) -> bool {
        if self.checkpoints > 1 && self.checkpoints >= self.journal {
            self.checkpoints = (self.checkpoints / 2).max(1);
            return true;
        }
        if self.journal > 1 {
            self.journal = (self.journal / 2).max(1);
            return true;
        }
        if self.checkpoints > 1 {
            self.checkpoints = (self.checkpoints / 2).max(1);
            return true;
        }
        false
    }
}

/// Everything one turn's prompt is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub context: &'a BootstrapContext,
    /// Coder sessions only.
    pub selected: Option<&'a Task>,
    pub transcript: &'a [TranscriptTurn],
    pub turn: u32,
    pub max_turns: u32,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("initializer", INITIALIZER_TEMPLATE)
            .expect("initializer template should be valid");
        env.add_template("coder", CODER_TEMPLATE)
            .expect("coder template should be valid");
        Self { env }
    }

    fn render(&self, input: &PromptInputs<'_>, window: HistoryWindow) -> Result<String> {
        let ctx = input.context;
        // Journal is oldest first, checkpoints newest first.
        let journal_shown = window.journal.min(ctx.journal.len());
        let journal = &ctx.journal[ctx.journal.len() - journal_shown..];
        let checkpoints: Vec<CheckpointView> = ctx
            .checkpoints
            .iter()
            .take(window.checkpoints)
            .map(|checkpoint| CheckpointView {
                id: checkpoint.short_id().to_string(),
                message: checkpoint.message.clone(),
                task_id: checkpoint.task_id.clone(),
            })
            .collect();
        let name = match ctx.kind {
            SessionKind::Initializer => "initializer",
            SessionKind::Coder => "coder",
        };
        let template = self.env.get_template(name)?;
        let rendered = template.render(context! {
            ctx => ctx,
            init_script => ctx.init_script.as_str(),
            environment => ctx.environment.describe(),
            journal => journal,
            journal_omitted => ctx.journal.len() - journal_shown,
            checkpoints_omitted => ctx.checkpoints.len() - checkpoints.len(),
            checkpoints => checkpoints,
            selected => input.selected,
            transcript => transcript_views(input.transcript),
            turn => input.turn,
            max_turns => input.max_turns,
        })?;
        Ok(rendered)
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop order when over budget: environment, transcript.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if total_len(sections) <= budget {
        return;
    }

    for key in ["environment", "transcript"] {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    if let Some(last) = sections.last_mut() {
        let other_len = total - last.content.len();
        let allowed = budget.saturating_sub(other_len);
        let before_len = last.content.len();
        let marker = "\n[truncated]";
        let keep = allowed.saturating_sub(marker.len());
        let kept = truncate_to_boundary(&last.content, keep).to_string();
        last.content = kept;
        if allowed > marker.len() {
            last.content.push_str(marker);
        }
        debug!(
            section = %last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs<'_>) -> Result<String> {
        let engine = PromptEngine::new();
        let mut window = HistoryWindow::full(input.context);
        loop {
            let rendered = engine.render(input, window)?;
            let mut sections = parse_sections(&rendered);
            if total_len(&sections) > self.budget_bytes && window.shrink() {
                debug!(
                    journal = window.journal,
                    checkpoints = window.checkpoints,
                    "shortened history for budget"
                );
                continue;
            }
            apply_budget_to_sections(&mut sections, self.budget_bytes);
            return Ok(render_sections(&sections));
        }
    }
}
