//! The gate every agent-originated mutation passes through.
//!
//! The gate confines paths to the sandbox root, keeps the agent away from
//! orchestrator-owned files, diffs registry writes against the immutability
//! rules and limits a Coder session to its selected task. Rejections are
//! [`BatonError`]s that the tool runner reports back to the agent.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::registry::TaskRegistry;
use crate::core::sandbox::{
    PathClass, classify, is_within, normalize_lexical, shell_expansion, shell_path_tokens,
};
use crate::core::types::SessionKind;
use crate::error::BatonError;
use crate::io::registry_store::parse_registry;
use crate::task::{NewTask, Task};

/// Shell tokens that name well-known sinks rather than files.
const SHELL_PATH_ALLOWLIST: &[&str] = &["/dev/null"];

/// A path that passed confinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinedPath {
    pub path: PathBuf,
    pub class: PathClass,
}

/// Effect of an accepted write to `.baton/tasks.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Unchanged,
    /// The initializer populated an empty registry.
    Created(usize),
    /// The selected task's `passes` flag was set; verification decides.
    Claimed(String),
}

#[derive(Debug)]
pub struct Gate {
    root: PathBuf,
    kind: SessionKind,
    selected: Option<String>,
    registry: TaskRegistry,
    claimed: bool,
}

impl Gate {
    /// `registry` is the session's working copy; it already includes this session's attempt.
    pub fn new(
        root: &Path,
        kind: SessionKind,
        selected: Option<String>,
        registry: TaskRegistry,
    ) -> Result<Self> {
        let root = fs::canonicalize(root)
            .with_context(|| format!("canonicalize sandbox root {}", root.display()))?;
        Ok(Self {
            root,
            kind,
            selected,
            registry,
            claimed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> TaskRegistry {
        self.registry
    }

    /// True once the selected task was claimed through `mark_passed` or a registry write.
    pub fn claimed(&self) -> bool {
        self.claimed
    }

    /// Resolve `raw` against the root and confine it.
    ///
    /// Lexical normalization runs first, then the deepest existing ancestor is
    /// canonicalized so symlinks cannot leave the root.
    pub fn confine(&self, raw: &str) -> Result<ConfinedPath, BatonError> {
        self.confine_from(&self.root, raw)
    }

    pub fn check_read(&self, raw: &str) -> Result<ConfinedPath, BatonError> {
        self.confine(raw)
    }

    /// Confine a write target. Orchestrator-owned files are rejected.
    pub fn check_write(&self, raw: &str) -> Result<ConfinedPath, BatonError> {
        let confined = self.confine(raw)?;
        if confined.class == PathClass::Protected {
            return Err(violation(raw, "is a protected path"));
        }
        Ok(confined)
    }

    /// Confine a shell call: its working directory and every path-like token.
    ///
    /// Returns the working directory to run in.
    pub fn check_shell(&self, command: &str, cwd: Option<&str>) -> Result<PathBuf, BatonError> {
        let workdir = match cwd {
            Some(raw) => {
                let confined = self.confine(raw)?;
                if confined.class != PathClass::Workspace {
                    return Err(violation(raw, "is a protected path"));
                }
                confined.path
            }
            None => self.root.clone(),
        };
        if let Some(expansion) = shell_expansion(command) {
            return Err(violation(
                command,
                &format!("uses shell expansion (`{expansion}`) whose target cannot be checked"),
            ));
        }
        for token in shell_path_tokens(command) {
            if SHELL_PATH_ALLOWLIST.contains(&token.as_str()) {
                continue;
            }
            if token.starts_with('~') {
                return Err(violation(&token, "refers to the home directory"));
            }
            self.confine_from(&workdir, &token)?;
        }
        Ok(workdir)
    }

    /// Diff a proposed `.baton/tasks.json` against the working registry.
    ///
    /// Immutable fields, order, membership and attempt counts must match.
    /// The only accepted difference in a Coder session is the selected task's
    /// `passes` flag going to true, which becomes a claim. An Initializer may
    /// populate an empty registry.
    pub fn apply_registry_write(&mut self, contents: &str) -> Result<RegistryChange, BatonError> {
        let doc = parse_registry(contents).map_err(|err| BatonError::ImmutableFieldViolation {
            violations: vec![format!("proposed task registry is invalid: {err:#}")],
        })?;

        if self.registry.is_empty() {
            if doc.tasks.is_empty() {
                return Ok(RegistryChange::Unchanged);
            }
            return self.populate(doc.tasks);
        }

        let violations = self.registry.check_proposed(&doc.tasks);
        if !violations.is_empty() {
            warn!(count = violations.len(), "registry write rejected");
            return Err(BatonError::ImmutableFieldViolation { violations });
        }

        let mut claim = None;
        for (prev, next) in self.registry.list().iter().zip(&doc.tasks) {
            if prev.passes == next.passes {
                continue;
            }
            if next.passes && self.selected.as_deref() == Some(prev.id.as_str()) {
                claim = Some(prev.id.clone());
            } else {
                return Err(self.scope_violation(&prev.id));
            }
        }
        match claim {
            Some(id) => {
                self.claimed = true;
                debug!(task_id = %id, "claim via registry write");
                Ok(RegistryChange::Claimed(id))
            }
            None => Ok(RegistryChange::Unchanged),
        }
    }

    /// `create_tasks` tool. Only an empty registry can be populated.
    pub fn create_tasks(&mut self, specs: Vec<NewTask>) -> Result<&[Task], BatonError> {
        if self.kind != SessionKind::Initializer {
            return Err(BatonError::AlreadyInitialized {
                existing: self.registry.len(),
            });
        }
        self.registry.create(specs)
    }

    /// `mark_passed` tool. Records a claim on the selected task; verification decides.
    pub fn claim(&mut self, id: &str) -> Result<(), BatonError> {
        if self.selected.as_deref() != Some(id) {
            return Err(self.scope_violation(id));
        }
        let task = self
            .registry
            .get(id)
            .ok_or_else(|| BatonError::NotFound { id: id.to_string() })?;
        if task.passes {
            return Err(BatonError::AlreadyPassed { id: id.to_string() });
        }
        self.claimed = true;
        Ok(())
    }

    fn populate(&mut self, tasks: Vec<Task>) -> Result<RegistryChange, BatonError> {
        if self.kind != SessionKind::Initializer {
            return Err(BatonError::ImmutableFieldViolation {
                violations: vec!["tasks are only created by the initializer".to_string()],
            });
        }
        let fresh: Vec<String> = tasks
            .iter()
            .filter(|task| task.passes || task.attempts != 0)
            .map(|task| format!("new task '{}' must start failing with 0 attempts", task.id))
            .collect();
        if !fresh.is_empty() {
            return Err(BatonError::ImmutableFieldViolation { violations: fresh });
        }
        let specs = tasks
            .into_iter()
            .map(|task| NewTask {
                category: task.category,
                description: task.description,
                steps: task.steps,
            })
            .collect();
        let created = self.registry.create(specs)?.len();
        Ok(RegistryChange::Created(created))
    }

    fn confine_from(&self, base: &Path, raw: &str) -> Result<ConfinedPath, BatonError> {
        let lexical = normalize_lexical(base, Path::new(raw));
        if !is_within(&self.root, &lexical) {
            return Err(violation(raw, "escapes the sandbox root"));
        }
        let resolved = resolve_existing_prefix(&lexical)
            .map_err(|err| violation(raw, &format!("cannot be resolved ({err})")))?;
        if !is_within(&self.root, &resolved) {
            return Err(violation(raw, "resolves outside the sandbox root"));
        }
        let class = classify(&self.root, &resolved);
        Ok(ConfinedPath {
            path: resolved,
            class,
        })
    }

    fn scope_violation(&self, attempted: &str) -> BatonError {
        BatonError::ScopeViolation {
            selected: self
                .selected
                .clone()
                .unwrap_or_else(|| format!("{} session", self.kind.as_str())),
            attempted: attempted.to_string(),
        }
    }
}

fn violation(path: &str, reason: &str) -> BatonError {
    BatonError::SandboxViolation {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest.
fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();
    while existing.symlink_metadata().is_err() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = fs::canonicalize(existing)?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::registry_store::render_registry;
    use crate::test_support::{new_task, registry_with};

    fn coder_gate(root: &Path) -> Gate {
        let registry = registry_with(&[("a", true, 1), ("b", false, 1), ("c", false, 0)]);
        Gate::new(root, SessionKind::Coder, Some("T2".to_string()), registry).expect("gate")
    }

    fn is_sandbox_violation(err: &BatonError) -> bool {
        matches!(err, BatonError::SandboxViolation { .. })
    }

    #[test]
    fn relative_paths_stay_inside() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = coder_gate(temp.path());
        let confined = gate.check_write("src/new/file.rs").expect("confined");
        assert_eq!(confined.class, PathClass::Workspace);
        assert!(confined.path.starts_with(gate.root()));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = coder_gate(temp.path());
        assert!(is_sandbox_violation(&gate.check_read("../outside.txt").unwrap_err()));
        assert!(is_sandbox_violation(&gate.check_write("/etc/passwd").unwrap_err()));
        assert!(is_sandbox_violation(&gate.check_write("a/../../x").unwrap_err()));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_out_of_the_root_are_rejected() {
        let outside = tempfile::tempdir().expect("outside");
        let temp = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).expect("symlink");
        let gate = coder_gate(temp.path());
        let err = gate.check_write("link/payload.txt").unwrap_err();
        assert_eq!(
            err,
            BatonError::SandboxViolation {
                path: "link/payload.txt".to_string(),
                reason: "resolves outside the sandbox root".to_string(),
            }
        );
    }

    #[test]
    fn orchestrator_files_are_protected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = coder_gate(temp.path());
        for raw in [".git/config", ".baton/progress.jsonl", ".baton/config.toml"] {
            assert!(is_sandbox_violation(&gate.check_write(raw).unwrap_err()), "{raw}");
        }
        assert_eq!(
            gate.check_write(".baton/tasks.json").expect("registry").class,
            PathClass::Registry
        );
        assert!(gate.check_read(".baton/progress.jsonl").is_ok());
    }

    #[test]
    fn shell_tokens_and_cwd_are_confined() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(temp.path().join("web")).expect("mkdir");
        let gate = coder_gate(temp.path());

        let cwd = gate.check_shell("npm test 2>/dev/null", Some("web")).expect("ok");
        assert!(cwd.ends_with("web"));
        assert!(gate.check_shell("cat ../README.md", Some("web")).is_ok());
        assert!(is_sandbox_violation(&gate.check_shell("cat ../x", None).unwrap_err()));
        assert!(is_sandbox_violation(&gate.check_shell("rm -rf /tmp/x", None).unwrap_err()));
        assert!(is_sandbox_violation(&gate.check_shell("ls ~/.ssh", None).unwrap_err()));
        assert!(is_sandbox_violation(&gate.check_shell("ls", Some("..")).unwrap_err()));
        assert!(is_sandbox_violation(&gate.check_shell("ls", Some(".git")).unwrap_err()));
    }

    #[test]
    fn shell_expansion_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = coder_gate(temp.path());

        for command in [
            "P=$(dirname \"$PWD\"); echo pwned > \"$P/escape.txt\"",
            "echo x > $HOME/escape.txt",
            "cp out.txt `dirname $PWD`",
        ] {
            assert!(
                is_sandbox_violation(&gate.check_shell(command, None).unwrap_err()),
                "{command}"
            );
        }
    }

    #[test]
    fn claims_are_scoped_to_the_selected_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut gate = coder_gate(temp.path());

        assert_eq!(
            gate.claim("T3").unwrap_err(),
            BatonError::ScopeViolation {
                selected: "T2".to_string(),
                attempted: "T3".to_string()
            }
        );
        assert!(!gate.claimed());
        gate.claim("T2").expect("claim");
        assert!(gate.claimed());
        assert!(!gate.registry().get("T2").expect("T2").passes);
    }

    #[test]
    fn registry_write_flipping_selected_task_is_a_claim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut gate = coder_gate(temp.path());
        let mut proposed = gate.registry().clone();
        proposed.mark_passed("T2").expect("mark");
        let contents = render_registry(&proposed).expect("render");

        let change = gate.apply_registry_write(&contents).expect("accepted");
        assert_eq!(change, RegistryChange::Claimed("T2".to_string()));
        assert!(gate.claimed());
    }

    #[test]
    fn registry_write_touching_other_tasks_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut gate = coder_gate(temp.path());

        let mut other = gate.registry().clone();
        other.mark_passed("T3").expect("mark");
        let err = gate
            .apply_registry_write(&render_registry(&other).expect("render"))
            .unwrap_err();
        assert!(matches!(err, BatonError::ScopeViolation { .. }));

        let mut edited = gate.registry().clone().into_tasks();
        edited[1].description = "something easier".to_string();
        let err = gate
            .apply_registry_write(
                &render_registry(&TaskRegistry::new(edited)).expect("render"),
            )
            .unwrap_err();
        assert!(matches!(err, BatonError::ImmutableFieldViolation { .. }));

        let err = gate.apply_registry_write("{\"tasks\": ").unwrap_err();
        assert!(matches!(err, BatonError::ImmutableFieldViolation { .. }));
        assert!(!gate.claimed());
    }

    #[test]
    fn initializer_populates_an_empty_registry_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut gate = Gate::new(
            temp.path(),
            SessionKind::Initializer,
            None,
            TaskRegistry::default(),
        )
        .expect("gate");

        let mut proposed = TaskRegistry::default();
        proposed
            .create(vec![new_task("a"), new_task("b")])
            .expect("create");
        let change = gate
            .apply_registry_write(&render_registry(&proposed).expect("render"))
            .expect("populate");
        assert_eq!(change, RegistryChange::Created(2));

        let err = gate.create_tasks(vec![new_task("c")]).unwrap_err();
        assert_eq!(err, BatonError::AlreadyInitialized { existing: 2 });
    }

    #[test]
    fn coders_cannot_create_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut gate = coder_gate(temp.path());
        let err = gate.create_tasks(vec![new_task("extra")]).unwrap_err();
        assert_eq!(err, BatonError::AlreadyInitialized { existing: 3 });
    }
}
