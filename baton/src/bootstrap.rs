//! Bootstrap ("get bearings") context for a fresh session.
//!
//! A session starts with no memory. Everything it knows about earlier sessions
//! comes from the context assembled here, in a fixed order: sandbox root,
//! task registry, recent journal entries, recent checkpoints.

use std::fs;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::types::SessionKind;
use crate::error::BatonError;
use crate::io::checkpoint::{Checkpoint, CheckpointManager};
use crate::io::config::BatonConfig;
use crate::io::environment::EnvironmentStatus;
use crate::io::init::BatonPaths;
use crate::io::journal::{Journal, ProgressEntry};
use crate::io::registry_store::load_registry;
use crate::task::Task;

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapContext {
    pub kind: SessionKind,
    pub sandbox_root: String,
    pub branch: Option<String>,
    pub tasks: Vec<Task>,
    pub passed: usize,
    pub max_attempts: u32,
    /// Oldest first.
    pub journal: Vec<ProgressEntry>,
    /// Newest first.
    pub checkpoints: Vec<Checkpoint>,
    /// Initializer sessions only.
    pub app_spec: Option<String>,
    pub init_script: String,
    pub environment: EnvironmentStatus,
}

impl BootstrapContext {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

/// Reads the three stores into a [`BootstrapContext`]. Never writes.
pub struct Assembler<'a> {
    paths: &'a BatonPaths,
    config: &'a BatonConfig,
    checkpoints: CheckpointManager,
}

impl<'a> Assembler<'a> {
    pub fn new(paths: &'a BatonPaths, config: &'a BatonConfig) -> Self {
        Self {
            paths,
            config,
            checkpoints: CheckpointManager::new(&paths.root),
        }
    }

    /// Assemble a fresh context. Coder sessions require a populated registry.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub fn assemble(
        &self,
        kind: SessionKind,
        environment: EnvironmentStatus,
    ) -> Result<BootstrapContext> {
        let registry = load_registry(&self.paths.registry_path)?;
        if kind == SessionKind::Coder && registry.is_empty() {
            return Err(BatonError::InitializationRequired {
                reason: "the task registry is empty; an initializer session must run first"
                    .to_string(),
            }
            .into());
        }

        let journal = Journal::new(&self.paths.journal_path)
            .tail(self.config.bootstrap_journal_window)?;
        let checkpoints = self
            .checkpoints
            .history(self.config.bootstrap_checkpoint_window)?;
        let branch = self.checkpoints.git().current_branch().ok();
        let app_spec = match kind {
            SessionKind::Initializer => Some(read_app_spec(self.paths)?),
            SessionKind::Coder => None,
        };

        let passed = registry.completion().passed;
        debug!(
            tasks = registry.len(),
            journal = journal.len(),
            checkpoints = checkpoints.len(),
            "assembled bootstrap context"
        );
        Ok(BootstrapContext {
            kind,
            sandbox_root: self.paths.root.display().to_string(),
            branch,
            tasks: registry.into_tasks(),
            passed,
            max_attempts: self.config.max_attempts_per_task,
            journal,
            checkpoints,
            app_spec,
            init_script: self.config.init_script.clone(),
            environment,
        })
    }
}

fn read_app_spec(paths: &BatonPaths) -> Result<String> {
    let path = &paths.app_spec_path;
    if !path.exists() {
        return Err(BatonError::InitializationRequired {
            reason: format!("missing application spec {}", path.display()),
        }
        .into());
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
