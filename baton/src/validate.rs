//! Validation helpers for the `.baton/` layout and its stores.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::path::Path;

use crate::io::checkpoint::CheckpointManager;
use crate::io::config::load_config;
use crate::io::init::{BatonPaths, ensure_gitignore};
use crate::io::journal::Journal;
use crate::io::registry_store::load_registry;

/// What a successful validation found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidateOutcome {
    pub tasks: usize,
    pub passed: usize,
    pub journal_entries: usize,
    /// Short id of HEAD, if the repository has commits.
    pub head: Option<String>,
}

/// Validate `.baton/` layout, config, registry, journal and repository.
pub fn validate_project(paths: &BatonPaths) -> Result<ValidateOutcome> {
    ensure_dir(&paths.baton_dir)?;
    ensure_file(&paths.gitignore_path)?;
    ensure_file(&paths.config_path)?;
    ensure_file(&paths.app_spec_path)?;
    ensure_gitignore(paths)?;

    load_config(&paths.config_path).with_context(|| "load config.toml")?;
    let registry = load_registry(&paths.registry_path).with_context(|| "load tasks.json")?;
    let journal = Journal::new(&paths.journal_path)
        .entries()
        .with_context(|| "load progress.jsonl")?;

    let checkpoints = CheckpointManager::new(&paths.root);
    if !checkpoints.git().is_repository() {
        return Err(anyhow!(
            "{} is not a git repository (run `baton init`)",
            paths.root.display()
        ));
    }
    let head = checkpoints
        .head()
        .with_context(|| "read HEAD")?
        .map(|checkpoint| checkpoint.short_id().to_string());

    let completion = registry.completion();
    Ok(ValidateOutcome {
        tasks: completion.total,
        passed: completion.passed,
        journal_entries: journal.len(),
        head,
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::test_support::{TestRepo, registry_with};

    #[test]
    fn validate_ok_for_fresh_project() {
        let repo = TestRepo::new().expect("repo");
        let paths = repo.init_project(None).expect("project");

        let outcome = validate_project(&paths).expect("validate");
        assert_eq!(outcome.tasks, 0);
        assert_eq!(outcome.journal_entries, 0);
        assert!(outcome.head.is_some());
    }

    #[test]
    fn validate_counts_tasks() {
        let repo = TestRepo::new().expect("repo");
        let paths = repo
            .init_project(Some(&registry_with(&[("a", true, 1), ("b", false, 0)])))
            .expect("project");

        let outcome = validate_project(&paths).expect("validate");
        assert_eq!((outcome.passed, outcome.tasks), (1, 2));
    }

    #[test]
    fn validate_errors_on_corrupt_registry() {
        let repo = TestRepo::new().expect("repo");
        let paths = repo.init_project(None).expect("project");
        fs::write(&paths.registry_path, "{\"version\": 1, \"tasks\": [{}]}").expect("write");

        let err = validate_project(&paths).expect_err("validate should fail");
        assert!(format!("{err:#}").contains("tasks.json"));
    }

    #[test]
    fn validate_errors_on_missing_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err =
            validate_project(&BatonPaths::new(temp.path())).expect_err("validate should fail");
        assert!(err.to_string().contains("missing directory"));
    }
}
