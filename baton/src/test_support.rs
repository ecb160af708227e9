//! Test-only helpers: deterministic tasks, scratch git repositories and
//! scripted agent/verifier backends.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::registry::TaskRegistry;
use crate::core::types::{AgentTurn, ToolCall, VerifyOutcome};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::init::{BatonPaths, InitOptions, init_baton};
use crate::io::registry_store::write_registry;
use crate::io::verifier::{VerifyPhase, VerifyRequest, Verifier};
use crate::task::{NewTask, Task};

/// A task with deterministic defaults.
pub fn task(id: &str, description: &str) -> Task {
    Task {
        id: id.to_string(),
        category: "functional".to_string(),
        description: description.to_string(),
        steps: vec![format!("check {description}")],
        passes: false,
        attempts: 0,
    }
}

/// A task proposal as the initializer would send it.
pub fn new_task(description: &str) -> NewTask {
    NewTask {
        category: "functional".to_string(),
        description: description.to_string(),
        steps: vec![format!("check {description}")],
    }
}

/// Registry built from `(description, passes, attempts)` rows with ids `T1..`.
pub fn registry_with(rows: &[(&str, bool, u32)]) -> TaskRegistry {
    let tasks = rows
        .iter()
        .enumerate()
        .map(|(position, (description, passes, attempts))| Task {
            passes: *passes,
            attempts: *attempts,
            ..task(&format!("T{}", position + 1), description)
        })
        .collect();
    TaskRegistry::new(tasks)
}

/// Scratch git repository with one initial commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.git(&["config", "user.name", "Baton Test"])?;
        repo.git(&["config", "user.email", "baton@example.com"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.root().join("README.md"), "# scratch\n").context("write README")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "--quiet", "-m", "initial commit"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Scaffold `.baton/` and commit it, optionally with a registry.
    pub fn init_project(&self, registry: Option<&TaskRegistry>) -> Result<BatonPaths> {
        let options = InitOptions {
            force: false,
            app_spec: Some("# Todo app\n\nA small todo list.\n".to_string()),
        };
        let paths = init_baton(self.root(), &options)?;
        if let Some(registry) = registry {
            write_registry(&paths.registry_path, registry)?;
        }
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", "scaffold baton"])?;
        Ok(paths)
    }

    /// Run git in the repository, failing on a non-zero exit.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .with_context(|| format!("run git {}", args.join(" ")))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    /// Number of commits reachable from HEAD.
    pub fn commit_count(&self) -> Result<usize> {
        let out = self.git(&["rev-list", "--count", "HEAD"])?;
        out.trim().parse().context("parse commit count")
    }
}

/// One scripted agent response.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Write this turn as the agent's output.
    Turn(AgentTurn),
    /// Fail the invocation, as a crashed or timed-out agent would.
    Fail(String),
}

impl ScriptedTurn {
    /// A finished turn with the given actions.
    pub fn done(summary: &str, actions: Vec<ToolCall>) -> Self {
        Self::Turn(AgentTurn {
            summary: summary.to_string(),
            done: true,
            actions,
        })
    }

    /// An unfinished turn; the session asks the agent again.
    pub fn working(summary: &str, actions: Vec<ToolCall>) -> Self {
        Self::Turn(AgentTurn {
            summary: summary.to_string(),
            done: false,
            actions,
        })
    }
}

/// Agent that replays scripted turns in order and records every prompt.
pub struct ScriptedAgent {
    turns: RefCell<VecDeque<ScriptedTurn>>,
    fallback: Option<ScriptedTurn>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: RefCell::new(turns.into()),
            fallback: None,
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// After the scripted turns run out, answer every invocation with `turn`.
    pub fn then_repeat(mut self, turn: ScriptedTurn) -> Self {
        self.fallback = Some(turn);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn invocations(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        let next = self.turns.borrow_mut().pop_front();
        let turn = next
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted agent has no turn left"))?;
        match turn {
            ScriptedTurn::Turn(turn) => {
                let json = serde_json::to_string_pretty(&turn).context("serialize turn")?;
                fs::write(&request.output_path, json)
                    .with_context(|| format!("write {}", request.output_path.display()))
            }
            ScriptedTurn::Fail(message) => Err(anyhow!(message)),
        }
    }
}

type VerifyFn = Box<dyn Fn(&Task, VerifyPhase) -> VerifyOutcome>;

/// Verifier driven by a closure; records `(task_id, phase)` for every run.
pub struct ScriptedVerifier {
    decide: VerifyFn,
    calls: RefCell<Vec<(String, VerifyPhase)>>,
}

impl ScriptedVerifier {
    pub fn new(decide: impl Fn(&Task, VerifyPhase) -> VerifyOutcome + 'static) -> Self {
        Self {
            decide: Box::new(decide),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Checks fail before the agent works and pass afterwards.
    pub fn red_green() -> Self {
        Self::new(|_, phase| match phase {
            VerifyPhase::Pre => VerifyOutcome::Fail,
            VerifyPhase::Post => VerifyOutcome::Pass,
        })
    }

    /// Checks never pass.
    pub fn always_failing() -> Self {
        Self::new(|_, _| VerifyOutcome::Fail)
    }

    pub fn calls(&self) -> Vec<(String, VerifyPhase)> {
        self.calls.borrow().clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome> {
        self.calls
            .borrow_mut()
            .push((request.task.id.clone(), request.phase));
        let outcome = (self.decide)(&request.task, request.phase);
        fs::write(&request.log_path, format!("scripted {outcome:?}\n"))
            .with_context(|| format!("write {}", request.log_path.display()))?;
        Ok(outcome)
    }
}
