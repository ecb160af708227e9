//! Durable session orchestrator CLI.
//!
//! Drives an external coding agent through Initializer and Coder sessions,
//! keeping all memory in `.baton/` and git checkpoints under `--root`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use baton::bootstrap::Assembler;
use baton::core::selector::Selection;
use baton::core::types::SessionKind;
use baton::error::{BatonError, as_baton};
use baton::exit_codes;
use baton::io::agent::CommandAgent;
use baton::io::checkpoint::CheckpointManager;
use baton::io::config::{BatonConfig, load_config};
use baton::io::environment::EnvironmentStatus;
use baton::io::init::{BatonPaths, InitOptions, init_baton};
use baton::io::prompt::{PromptBuilder, PromptInputs};
use baton::io::registry_store::load_registry;
use baton::io::verifier::CommandVerifier;
use baton::orchestrator::{Orchestrator, Plan, StepResult, plan_next};
use baton::recovery::revert_project;
use baton::select::select_from_root;
use baton::session::SessionReport;
use baton::status::{project_status, render_status, stop_exit_code};
use baton::validate::validate_project;

#[derive(Parser)]
#[command(
    name = "baton",
    version,
    about = "Durable session orchestrator for a stateless coding agent"
)]
struct Cli {
    /// Project root (the sandbox the agent works in).
    #[arg(long, env = "BATON_ROOT", default_value = ".", global = true)]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.baton/` (and a git repository if needed) and commit the scaffold.
    Init {
        /// Rewrite config and app spec; never touches the registry or journal.
        #[arg(short, long)]
        force: bool,
        /// Markdown file to use as the application spec.
        #[arg(long)]
        app_spec: Option<PathBuf>,
    },
    /// Run sessions until every task passes, the project blocks, or the session limit.
    Run {
        #[arg(long)]
        max_sessions: Option<u32>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Run exactly one session.
    Step {
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Show task progress, recent sessions and the last checkpoint.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print the id of the next task a Coder session would work on.
    Select {
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Check `.baton/` layout, config, registry, journal and repository.
    Validate,
    /// List recent checkpoints, newest first.
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the first-turn prompt the next session would receive.
    Context {
        /// Defaults to the kind the next cycle would run.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Restore the working tree of an earlier checkpoint as a new checkpoint.
    ///
    /// The journal and task attempt counts are kept.
    Revert { commit: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Initializer,
    Coder,
}

fn main() {
    baton::logging::init();
    let cli = Cli::parse();
    let paths = BatonPaths::new(&cli.root);
    match run(cli.command, &paths) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            report_recovery_point(&paths);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

/// Tell the operator where a fatal error left the project.
fn report_recovery_point(paths: &BatonPaths) {
    if let Ok(config) = load_config(&paths.config_path) {
        if let Ok(registry) = load_registry(&paths.registry_path) {
            let blocked: Vec<&str> = registry
                .blocked(config.max_attempts_per_task)
                .into_iter()
                .map(|task| task.id.as_str())
                .collect();
            if !blocked.is_empty() {
                eprintln!("blocked tasks: {}", blocked.join(", "));
            }
        }
    }
    if let Ok(Some(head)) = CheckpointManager::new(&paths.root).head() {
        eprintln!("recovery checkpoint: {} {}", head.short_id(), head.message);
    }
}

fn run(command: Command, paths: &BatonPaths) -> Result<i32> {
    match command {
        Command::Init { force, app_spec } => cmd_init(paths, force, app_spec.as_deref()),
        Command::Run {
            max_sessions,
            max_attempts,
        } => cmd_run(paths, max_sessions, max_attempts),
        Command::Step { max_attempts } => cmd_step(paths, max_attempts),
        Command::Status { json } => cmd_status(paths, json),
        Command::Select { max_attempts } => cmd_select(paths, max_attempts),
        Command::Validate => cmd_validate(paths),
        Command::History { limit } => cmd_history(paths, limit),
        Command::Context { kind } => cmd_context(paths, kind),
        Command::Revert { commit } => cmd_revert(paths, &commit),
    }
}

fn cmd_init(paths: &BatonPaths, force: bool, app_spec: Option<&Path>) -> Result<i32> {
    let app_spec = app_spec
        .map(|path| fs::read_to_string(path).with_context(|| format!("read {}", path.display())))
        .transpose()?;
    let checkpoints = CheckpointManager::new(&paths.root);
    checkpoints.ensure_repository()?;
    init_baton(&paths.root, &InitOptions { force, app_spec })?;
    match checkpoints.commit("baton: init", None) {
        Ok(checkpoint) => println!(
            "initialized {} ({})",
            paths.baton_dir.display(),
            checkpoint.short_id()
        ),
        Err(err) if matches!(as_baton(&err), Some(BatonError::NothingToCommit)) => {
            println!("initialized {} (nothing new to commit)", paths.baton_dir.display());
        }
        Err(err) => return Err(err),
    }
    Ok(exit_codes::OK)
}

fn load_run_config(paths: &BatonPaths, max_attempts: Option<u32>) -> Result<BatonConfig> {
    let mut config = load_config(&paths.config_path)?;
    if let Some(max_attempts) = max_attempts {
        if max_attempts == 0 {
            return Err(anyhow!("--max-attempts must be > 0"));
        }
        config.max_attempts_per_task = max_attempts;
    }
    Ok(config)
}

fn cmd_run(
    paths: &BatonPaths,
    max_sessions: Option<u32>,
    max_attempts: Option<u32>,
) -> Result<i32> {
    let config = load_run_config(paths, max_attempts)?;
    let agent = CommandAgent::new(config.agent.command.clone());
    let verifier = CommandVerifier::new(config.verify.command.clone());
    let orchestrator = Orchestrator::new(paths, &config, &agent, &verifier);

    let outcome = orchestrator.run(max_sessions.unwrap_or(config.max_sessions), print_session)?;
    println!("{} ({} sessions)", outcome.stop.describe(), outcome.sessions);
    Ok(stop_exit_code(&outcome.stop))
}

fn cmd_step(paths: &BatonPaths, max_attempts: Option<u32>) -> Result<i32> {
    let config = load_run_config(paths, max_attempts)?;
    let agent = CommandAgent::new(config.agent.command.clone());
    let verifier = CommandVerifier::new(config.verify.command.clone());
    match Orchestrator::new(paths, &config, &agent, &verifier).step()? {
        StepResult::Ran(report) => {
            print_session(&report);
            Ok(exit_codes::OK)
        }
        StepResult::Stopped(stop) => {
            println!("nothing to run: {}", stop.describe());
            Ok(stop_exit_code(&stop))
        }
    }
}

fn print_session(report: &SessionReport) {
    let task = report
        .task_id
        .as_deref()
        .map(|id| format!(" {id}"))
        .unwrap_or_default();
    println!(
        "session {} {}{task}: {} ({})",
        report.index,
        report.kind.as_str(),
        report.outcome.as_str(),
        report.checkpoint.short_id()
    );
    if let Some(mismatch) = &report.mismatch {
        println!("  {mismatch}");
    }
    if let Some(error) = &report.error {
        println!("  aborted: {error}");
    }
}

fn cmd_status(paths: &BatonPaths, json: bool) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let report = project_status(paths, &config)?;
    if json {
        print_json(&report)?;
    } else {
        print!("{}", render_status(&report));
    }
    Ok(exit_codes::OK)
}

fn cmd_select(paths: &BatonPaths, max_attempts: Option<u32>) -> Result<i32> {
    match select_from_root(paths, max_attempts)? {
        Selection::Open(task) => {
            println!("{}", task.id);
            Ok(exit_codes::OK)
        }
        Selection::Complete => {
            println!("complete");
            Ok(exit_codes::COMPLETE)
        }
        Selection::Blocked { ids } => {
            println!("blocked: {}", ids.join(", "));
            Ok(exit_codes::BLOCKED)
        }
        Selection::Uninitialized => Err(BatonError::InitializationRequired {
            reason: "the task registry is empty (run `baton step` to start an initializer session)"
                .to_string(),
        }
        .into()),
    }
}

fn cmd_validate(paths: &BatonPaths) -> Result<i32> {
    let outcome = validate_project(paths)?;
    println!(
        "ok: {}/{} tasks passing, {} journal entries, head {}",
        outcome.passed,
        outcome.tasks,
        outcome.journal_entries,
        outcome.head.as_deref().unwrap_or("(none)")
    );
    Ok(exit_codes::OK)
}

fn cmd_history(paths: &BatonPaths, limit: usize) -> Result<i32> {
    for checkpoint in CheckpointManager::new(&paths.root).history(limit)? {
        match &checkpoint.task_id {
            Some(task_id) => {
                println!("{} {} [{task_id}]", checkpoint.short_id(), checkpoint.message);
            }
            None => println!("{} {}", checkpoint.short_id(), checkpoint.message),
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_context(paths: &BatonPaths, kind: Option<KindArg>) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let plan = plan_next(paths, &config)?;
    let kind = match (kind, &plan) {
        (Some(KindArg::Initializer), _) | (None, Plan::Initialize) => SessionKind::Initializer,
        (Some(KindArg::Coder), _) | (None, Plan::Code(_)) => SessionKind::Coder,
        (None, Plan::Stop(stop)) => {
            println!("no session would run: {}", stop.describe());
            return Ok(stop_exit_code(stop));
        }
    };
    let environment = if paths.init_script_path(&config).is_file() {
        EnvironmentStatus::NotRun
    } else {
        EnvironmentStatus::Missing
    };
    let context = Assembler::new(paths, &config).assemble(kind, environment)?;
    let selected = match &plan {
        Plan::Code(task) if kind == SessionKind::Coder => context.task(&task.id),
        _ => None,
    };
    let prompt = PromptBuilder::new(config.prompt_budget_bytes).build(&PromptInputs {
        context: &context,
        selected,
        transcript: &[],
        turn: 1,
        max_turns: config.max_turns_per_session,
    })?;
    print!("{prompt}");
    Ok(exit_codes::OK)
}

fn cmd_revert(paths: &BatonPaths, commit: &str) -> Result<i32> {
    let report = revert_project(paths, commit)?;
    println!(
        "restored {} ({}) as checkpoint {}",
        report.target.short_id(),
        report.target.message,
        report.checkpoint.short_id()
    );
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
