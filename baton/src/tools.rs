//! Executes agent tool calls through the gate.
//!
//! Every call produces a [`ToolResult`]. Gate rejections and timeouts are
//! reported to the agent and the session continues; only persistence
//! failures escape as errors.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::sandbox::PathClass;
use crate::core::types::{ToolCall, ToolResult};
use crate::error::{BatonError, as_baton};
use crate::guardrail::{Gate, RegistryChange};
use crate::io::config::BatonConfig;
use crate::io::git::Git;
use crate::io::init::BatonPaths;
use crate::io::process::{run_command_with_timeout, truncate_to_boundary};
use crate::io::registry_store::write_registry;
use crate::task::NewTask;

const DEFAULT_GIT_LOG_LIMIT: usize = 10;
const MAX_GIT_LOG_LIMIT: usize = 100;

enum ToolOutput {
    Ok(String),
    Unsuccessful(String),
}

pub struct ToolRunner {
    gate: Gate,
    git: Git,
    registry_path: PathBuf,
    protected: Vec<PathBuf>,
    default_timeout: Duration,
    max_timeout: Duration,
    output_limit: usize,
}

impl ToolRunner {
    pub fn new(gate: Gate, paths: &BatonPaths, config: &BatonConfig) -> Self {
        Self {
            git: Git::new(&paths.root),
            registry_path: paths.registry_path.clone(),
            protected: vec![
                paths.registry_path.clone(),
                paths.journal_path.clone(),
                paths.config_path.clone(),
                paths.app_spec_path.clone(),
                paths.gitignore_path.clone(),
            ],
            default_timeout: config.tool_timeout(),
            max_timeout: config.session_timeout(),
            output_limit: config.output_limit_bytes,
            gate,
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn into_gate(self) -> Gate {
        self.gate
    }

    /// Run one call. Tool-local violations become failed results.
    #[instrument(skip_all, fields(tool = call.name()))]
    pub fn execute(&mut self, call: &ToolCall) -> Result<ToolResult> {
        let name = call.name();
        match self.dispatch(call) {
            Ok(ToolOutput::Ok(output)) => Ok(ToolResult::ok(name, output)),
            Ok(ToolOutput::Unsuccessful(output)) => Ok(ToolResult::unsuccessful(name, output)),
            Err(err) => match as_baton(&err) {
                Some(domain) if domain.is_tool_local() => {
                    warn!(kind = domain.kind(), err = %domain, "tool call rejected");
                    Ok(ToolResult::failed(name, domain.kind(), domain.to_string()))
                }
                _ => Err(err),
            },
        }
    }

    fn dispatch(&mut self, call: &ToolCall) -> Result<ToolOutput> {
        match call {
            ToolCall::ReadFile { path } => self.read_file(path),
            ToolCall::WriteFile { path, contents } => self.write_file(path, contents),
            ToolCall::Shell {
                command,
                cwd,
                timeout_secs,
            } => self.shell(command, cwd.as_deref(), *timeout_secs),
            ToolCall::GitLog { limit } => {
                let limit = limit.unwrap_or(DEFAULT_GIT_LOG_LIMIT).min(MAX_GIT_LOG_LIMIT);
                Ok(self.git_output(self.git.log_oneline(limit)))
            }
            ToolCall::GitStatus => Ok(self.git_output(self.git.status_short())),
            ToolCall::GitDiff => Ok(self.git_output(self.git.diff_head())),
            ToolCall::CreateTasks { tasks } => self.create_tasks(tasks),
            ToolCall::MarkPassed { task_id } => {
                self.gate.claim(task_id)?;
                Ok(ToolOutput::Ok(format!(
                    "claim recorded for {task_id}; it is marked passing only after verification"
                )))
            }
        }
    }

    fn read_file(&self, raw: &str) -> Result<ToolOutput> {
        let target = self.gate.check_read(raw)?;
        match fs::read_to_string(&target.path) {
            Ok(contents) => Ok(ToolOutput::Ok(self.bounded(contents))),
            Err(err) => Ok(ToolOutput::Unsuccessful(format!("read {raw}: {err}"))),
        }
    }

    fn write_file(&mut self, raw: &str, contents: &str) -> Result<ToolOutput> {
        let target = self.gate.check_write(raw)?;
        if target.class == PathClass::Registry {
            let message = match self.gate.apply_registry_write(contents)? {
                RegistryChange::Created(count) => {
                    write_registry(&self.registry_path, self.gate.registry())?;
                    format!("created {count} tasks")
                }
                RegistryChange::Claimed(id) => format!(
                    "claim recorded for {id}; it is marked passing only after verification"
                ),
                RegistryChange::Unchanged => "task registry unchanged".to_string(),
            };
            return Ok(ToolOutput::Ok(message));
        }

        if let Some(parent) = target.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                return Ok(ToolOutput::Unsuccessful(format!(
                    "create directory for {raw}: {err}"
                )));
            }
        }
        match fs::write(&target.path, contents) {
            Ok(()) => Ok(ToolOutput::Ok(format!("wrote {} bytes to {raw}", contents.len()))),
            Err(err) => Ok(ToolOutput::Unsuccessful(format!("write {raw}: {err}"))),
        }
    }

    fn shell(
        &mut self,
        command: &str,
        cwd: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<ToolOutput> {
        let workdir = self.gate.check_shell(command, cwd)?;
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout);

        let snapshot = ProtectedSnapshot::capture(&self.protected, &self.git)?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&workdir);
        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit);
        let tampered = snapshot.restore(&self.git)?;

        if !tampered.is_empty() {
            return Err(BatonError::SandboxViolation {
                path: tampered.join(", "),
                reason: "was modified by a shell command and has been restored".to_string(),
            }
            .into());
        }
        let output = match output {
            Ok(output) => output,
            Err(err) => return Ok(ToolOutput::Unsuccessful(format!("{err:#}"))),
        };
        if output.timed_out {
            return Err(BatonError::ToolTimeout {
                tool: "shell".to_string(),
                secs: timeout.as_secs(),
            }
            .into());
        }
        let rendered = output.render("shell");
        debug!(exit_code = ?output.status.code(), "shell finished");
        if output.success() {
            Ok(ToolOutput::Ok(rendered))
        } else {
            Ok(ToolOutput::Unsuccessful(rendered))
        }
    }

    fn create_tasks(&mut self, tasks: &[NewTask]) -> Result<ToolOutput> {
        let ids: Vec<String> = self
            .gate
            .create_tasks(tasks.to_vec())?
            .iter()
            .map(|task| task.id.clone())
            .collect();
        write_registry(&self.registry_path, self.gate.registry())?;
        Ok(ToolOutput::Ok(format!(
            "created {} tasks: {}",
            ids.len(),
            ids.join(", ")
        )))
    }

    fn git_output(&self, result: Result<String>) -> ToolOutput {
        match result {
            Ok(text) => ToolOutput::Ok(self.bounded(text)),
            Err(err) => ToolOutput::Unsuccessful(format!("{err:#}")),
        }
    }

    fn bounded(&self, text: String) -> String {
        if text.len() <= self.output_limit {
            return text;
        }
        let kept = truncate_to_boundary(&text, self.output_limit);
        format!("{kept}\n[truncated {} bytes]", text.len() - kept.len())
    }
}

/// Orchestrator-owned files and HEAD, captured around a shell call.
struct ProtectedSnapshot {
    files: Vec<(PathBuf, Option<Vec<u8>>)>,
    head: Option<String>,
}

impl ProtectedSnapshot {
    fn capture(paths: &[PathBuf], git: &Git) -> Result<Self> {
        let files = paths
            .iter()
            .map(|path| (path.clone(), fs::read(path).ok()))
            .collect();
        Ok(Self {
            files,
            head: git.head_sha()?,
        })
    }

    /// Undo changes to protected state. Returns what was restored.
    fn restore(&self, git: &Git) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for (path, before) in &self.files {
            let now = fs::read(path).ok();
            if &now == before {
                continue;
            }
            restore_file(path, before.as_deref())
                .map_err(|err| BatonError::persistence(path, err))?;
            restored.push(display_rel(git.workdir(), path));
        }
        let head = git.head_sha()?;
        if head != self.head {
            match &self.head {
                Some(sha) => {
                    git.reset_soft(sha)?;
                    restored.push("HEAD".to_string());
                }
                None => warn!("HEAD appeared during a shell call on an unborn branch"),
            }
        }
        if !restored.is_empty() {
            warn!(restored = ?restored, "shell call touched protected state");
        }
        Ok(restored)
    }
}

fn restore_file(path: &Path, contents: Option<&[u8]>) -> std::io::Result<()> {
    match contents {
        Some(bytes) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes)
        }
        None => fs::remove_file(path),
    }
}

fn display_rel(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::TaskRegistry;
    use crate::core::types::SessionKind;
    use crate::io::init::{InitOptions, init_baton};
    use crate::io::registry_store::load_registry;
    use crate::test_support::{TestRepo, new_task, registry_with};

    struct Fixture {
        repo: TestRepo,
        paths: BatonPaths,
    }

    fn fixture(registry: &TaskRegistry) -> Fixture {
        let repo = TestRepo::new().expect("repo");
        let paths = init_baton(repo.root(), &InitOptions::default()).expect("init");
        if !registry.is_empty() {
            write_registry(&paths.registry_path, registry).expect("registry");
        }
        Git::new(repo.root()).add_all().expect("add");
        Git::new(repo.root())
            .commit_staged("scaffold")
            .expect("commit");
        Fixture { repo, paths }
    }

    fn runner(fixture: &Fixture, kind: SessionKind, selected: Option<&str>) -> ToolRunner {
        let registry = load_registry(&fixture.paths.registry_path).expect("load");
        let gate = Gate::new(
            fixture.repo.root(),
            kind,
            selected.map(str::to_string),
            registry,
        )
        .expect("gate");
        let mut config = BatonConfig::default();
        config.tool_timeout_secs = 5;
        ToolRunner::new(gate, &fixture.paths, &config)
    }

    #[test]
    fn write_then_read_inside_the_sandbox() {
        let fixture = fixture(&registry_with(&[("a", false, 1)]));
        let mut tools = runner(&fixture, SessionKind::Coder, Some("T1"));

        let write = tools
            .execute(&ToolCall::WriteFile {
                path: "src/app.txt".to_string(),
                contents: "hello".to_string(),
            })
            .expect("write");
        assert!(write.ok);
        let read = tools
            .execute(&ToolCall::ReadFile {
                path: "src/app.txt".to_string(),
            })
            .expect("read");
        assert_eq!(read.output, "hello");

        let missing = tools
            .execute(&ToolCall::ReadFile {
                path: "nope.txt".to_string(),
            })
            .expect("read missing");
        assert!(!missing.ok);
        assert!(missing.error.is_none());
    }

    #[test]
    fn writes_outside_the_sandbox_leave_no_trace() {
        let fixture = fixture(&registry_with(&[("a", false, 1)]));
        let outside = tempfile::tempdir().expect("outside");
        let target = outside.path().join("escaped.txt");
        let mut tools = runner(&fixture, SessionKind::Coder, Some("T1"));

        let result = tools
            .execute(&ToolCall::WriteFile {
                path: target.display().to_string(),
                contents: "x".to_string(),
            })
            .expect("execute");

        assert_eq!(result.error.as_deref(), Some("SandboxViolation"));
        assert!(!target.exists());
    }

    #[test]
    fn shell_runs_in_the_root_and_reports_failures() {
        let fixture = fixture(&registry_with(&[("a", false, 1)]));
        let mut tools = runner(&fixture, SessionKind::Coder, Some("T1"));

        let ok = tools
            .execute(&ToolCall::Shell {
                command: "echo hi > out.txt && cat out.txt".to_string(),
                cwd: None,
                timeout_secs: None,
            })
            .expect("shell");
        assert!(ok.ok);
        assert!(ok.output.contains("hi"));
        assert!(fixture.repo.root().join("out.txt").exists());

        let failed = tools
            .execute(&ToolCall::Shell {
                command: "exit 3".to_string(),
                cwd: None,
                timeout_secs: None,
            })
            .expect("shell");
        assert!(!failed.ok);
        assert!(failed.output.contains("exit code Some(3)"));
    }

    #[test]
    fn shell_timeout_is_a_failed_call_not_a_crash() {
        let fixture = fixture(&registry_with(&[("a", false, 1)]));
        let mut tools = runner(&fixture, SessionKind::Coder, Some("T1"));
        let result = tools
            .execute(&ToolCall::Shell {
                command: "sleep 5".to_string(),
                cwd: None,
                timeout_secs: Some(1),
            })
            .expect("shell");
        assert_eq!(result.error.as_deref(), Some("ToolTimeout"));
    }

    #[test]
    fn shell_edits_to_protected_files_are_undone() {
        let fixture = fixture(&registry_with(&[("a", false, 1)]));
        let before = fs::read(&fixture.paths.registry_path).expect("registry");
        let mut tools = runner(&fixture, SessionKind::Coder, Some("T1"));

        let result = tools
            .execute(&ToolCall::Shell {
                command: "echo '{}' > .baton/tasks.json && echo x >> .baton/progress.jsonl"
                    .to_string(),
                cwd: None,
                timeout_secs: None,
            })
            .expect("shell");

        assert_eq!(result.error.as_deref(), Some("SandboxViolation"));
        assert_eq!(fs::read(&fixture.paths.registry_path).expect("registry"), before);
        assert!(!fixture.paths.journal_path.exists());
    }

    #[test]
    fn shell_commits_are_rolled_back() {
        let fixture = fixture(&registry_with(&[("a", false, 1)]));
        let git = Git::new(fixture.repo.root());
        let head = git.head_sha().expect("head");
        let mut tools = runner(&fixture, SessionKind::Coder, Some("T1"));

        let result = tools
            .execute(&ToolCall::Shell {
                command: "echo x > f.txt && git add f.txt && git commit -q -m sneaky".to_string(),
                cwd: None,
                timeout_secs: None,
            })
            .expect("shell");

        assert_eq!(result.error.as_deref(), Some("SandboxViolation"));
        assert_eq!(git.head_sha().expect("head"), head);
        assert!(fixture.repo.root().join("f.txt").exists());
    }

    #[test]
    fn create_tasks_persists_the_registry() {
        let fixture = fixture(&TaskRegistry::default());
        let mut tools = runner(&fixture, SessionKind::Initializer, None);

        let result = tools
            .execute(&ToolCall::CreateTasks {
                tasks: vec![new_task("a"), new_task("b")],
            })
            .expect("create");
        assert!(result.ok);
        assert_eq!(result.output, "created 2 tasks: T1, T2");
        assert_eq!(load_registry(&fixture.paths.registry_path).expect("load").len(), 2);

        let again = tools
            .execute(&ToolCall::CreateTasks {
                tasks: vec![new_task("c")],
            })
            .expect("create again");
        assert_eq!(again.error.as_deref(), Some("AlreadyInitialized"));
    }

    #[test]
    fn mark_passed_outside_scope_is_rejected() {
        let fixture = fixture(&registry_with(&[("a", false, 1), ("b", false, 0)]));
        let mut tools = runner(&fixture, SessionKind::Coder, Some("T1"));

        let other = tools
            .execute(&ToolCall::MarkPassed {
                task_id: "T2".to_string(),
            })
            .expect("execute");
        assert_eq!(other.error.as_deref(), Some("ScopeViolation"));

        let own = tools
            .execute(&ToolCall::MarkPassed {
                task_id: "T1".to_string(),
            })
            .expect("execute");
        assert!(own.ok);
        assert!(tools.gate().claimed());
        assert!(
            !load_registry(&fixture.paths.registry_path)
                .expect("load")
                .get("T1")
                .expect("T1")
                .passes
        );
    }
}
