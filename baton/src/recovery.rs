//! Rolling the working tree back to a checkpoint without losing history.
//!
//! A rollback restores an older tree, but two things never go backwards: the
//! progress journal keeps every entry, and task attempt counts keep their
//! highest value. Both are captured before the restore and written back
//! afterwards.

use std::fs;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::registry::TaskRegistry;
use crate::error::BatonError;
use crate::io::checkpoint::{Checkpoint, CheckpointManager};
use crate::io::init::BatonPaths;
use crate::io::journal::{EntryKind, Journal, ProgressEntry};
use crate::io::registry_store::{load_registry, parse_registry, write_registry};

/// Journal and registry state that must survive a rollback.
struct Carried {
    journal: Option<Vec<u8>>,
    registry: Option<TaskRegistry>,
}

impl Carried {
    fn capture(
        paths: &BatonPaths,
        manager: &CheckpointManager,
        keep_registry: bool,
    ) -> Result<Self> {
        let journal = if paths.journal_path.exists() {
            Some(
                fs::read(&paths.journal_path)
                    .with_context(|| format!("read {}", paths.journal_path.display()))?,
            )
        } else {
            None
        };
        let registry = if keep_registry {
            Some(current_registry(paths, manager)?)
        } else {
            None
        };
        Ok(Self { journal, registry })
    }

    fn reapply(self, paths: &BatonPaths) -> Result<()> {
        if let Some(bytes) = self.journal {
            fs::write(&paths.journal_path, bytes)
                .map_err(|err| BatonError::persistence(&paths.journal_path, err))?;
        }
        if let Some(current) = self.registry.filter(|registry| !registry.is_empty()) {
            let restored = load_registry(&paths.registry_path)?;
            let merged = TaskRegistry::carry_forward(&restored, &current);
            write_registry(&paths.registry_path, &merged)?;
        }
        Ok(())
    }
}

/// The registry on disk, or HEAD's copy when the working file is unreadable.
fn current_registry(paths: &BatonPaths, manager: &CheckpointManager) -> Result<TaskRegistry> {
    match load_registry(&paths.registry_path) {
        Ok(registry) => Ok(registry),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "working registry unreadable, using HEAD's copy");
            let committed = manager
                .git()
                .show_file("HEAD", paths.registry_rel())?
                .ok_or_else(|| anyhow!("no committed task registry to fall back to"))?;
            let doc = parse_registry(&committed).context("parse HEAD task registry")?;
            Ok(TaskRegistry::new(doc.tasks))
        }
    }
}

/// Throw away an aborted session's uncommitted work.
///
/// With `keep_attempts`, attempt counts recorded since HEAD survive.
#[instrument(skip_all, fields(keep_attempts))]
pub fn discard_session_work(paths: &BatonPaths, keep_attempts: bool) -> Result<()> {
    let manager = CheckpointManager::new(&paths.root);
    let carried = Carried::capture(paths, &manager, keep_attempts)?;
    manager.discard_uncommitted()?;
    carried.reapply(paths)?;
    info!("uncommitted session work discarded");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct RevertReport {
    /// The checkpoint whose tree was restored.
    pub target: Checkpoint,
    /// The new checkpoint recording the restore.
    pub checkpoint: Checkpoint,
    pub session_index: u32,
}

/// Operator rollback: restore `commit_id`'s tree and commit it on top of HEAD.
#[instrument(skip_all, fields(commit_id))]
pub fn revert_project(paths: &BatonPaths, commit_id: &str) -> Result<RevertReport> {
    let manager = CheckpointManager::new(&paths.root);
    let carried = Carried::capture(paths, &manager, true)?;
    let target = manager.revert_to(commit_id)?;
    carried.reapply(paths)?;

    let journal = Journal::new(&paths.journal_path);
    let session_index = journal.next_session_index()?;
    journal.append(&ProgressEntry::new(
        session_index,
        EntryKind::Recovery,
        format!(
            "operator reverted the working tree to {} ({})",
            target.short_id(),
            target.message
        ),
    ))?;
    let checkpoint = manager.commit(
        &format!("baton: session {session_index} revert to {}", target.short_id()),
        None,
    )?;
    info!(target = target.short_id(), checkpoint = checkpoint.short_id(), "project reverted");
    Ok(RevertReport {
        target,
        checkpoint,
        session_index,
    })
}
