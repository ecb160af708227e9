//! Initialization helpers for `.baton/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use super::config::{BatonConfig, write_config};

/// All canonical paths within `.baton/` for a project root.
#[derive(Debug, Clone)]
pub struct BatonPaths {
    pub root: PathBuf,
    pub baton_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub app_spec_path: PathBuf,
    pub config_path: PathBuf,
    pub registry_path: PathBuf,
    pub journal_path: PathBuf,
}

impl BatonPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let baton_dir = root.join(".baton");
        Self {
            root: root.clone(),
            baton_dir: baton_dir.clone(),
            sessions_dir: baton_dir.join("sessions"),
            gitignore_path: baton_dir.join(".gitignore"),
            app_spec_path: baton_dir.join("app_spec.md"),
            config_path: baton_dir.join("config.toml"),
            registry_path: baton_dir.join("tasks.json"),
            journal_path: baton_dir.join("progress.jsonl"),
        }
    }

    /// Log directory for one session.
    pub fn session_dir(&self, session_index: u32) -> PathBuf {
        self.sessions_dir.join(session_index.to_string())
    }

    /// Environment bring-up script named by `init_script`, relative to the root.
    pub fn init_script_path(&self, config: &BatonConfig) -> PathBuf {
        self.root.join(&config.init_script)
    }

    /// Registry path relative to the root, as git sees it.
    pub fn registry_rel(&self) -> &'static str {
        ".baton/tasks.json"
    }
}

/// Options for `init_baton`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite existing orchestrator-owned files.
    pub force: bool,
    /// Application spec handed to the Initializer. A placeholder is written when absent.
    pub app_spec: Option<String>,
}

/// Create `.baton/` scaffolding in `root`.
///
/// Fails if `.baton/` already exists unless `options.force` is set. The task
/// registry and journal are not created here: a missing registry reads as
/// empty and a missing journal has no entries.
#[instrument(skip_all, fields(root = %root.display(), force = options.force))]
pub fn init_baton(root: &Path, options: &InitOptions) -> Result<BatonPaths> {
    let paths = BatonPaths::new(root);
    if paths.baton_dir.exists() && !options.force {
        return Err(anyhow!(
            "baton init: .baton already exists (use --force to overwrite)"
        ));
    }
    if paths.baton_dir.exists() && !paths.baton_dir.is_dir() {
        return Err(anyhow!("baton init: .baton exists but is not a directory"));
    }
    if options.force && paths.registry_path.exists() {
        return Err(anyhow!(
            "baton init: refusing to reinitialize a project that already has a task registry"
        ));
    }

    create_dir(&paths.baton_dir)?;
    create_dir(&paths.sessions_dir)?;
    write_file(&paths.gitignore_path, BATON_GITIGNORE)?;
    write_config(&paths.config_path, &BatonConfig::default())?;
    let app_spec = options.app_spec.as_deref().unwrap_or(APP_SPEC_PLACEHOLDER);
    write_file(&paths.app_spec_path, app_spec)?;

    debug!("scaffolded .baton");
    Ok(paths)
}

/// Check that `.gitignore` keeps session logs out of checkpoints.
pub fn ensure_gitignore(paths: &BatonPaths) -> Result<()> {
    let path = &paths.gitignore_path;
    if !path.exists() {
        return Err(anyhow!("missing {} (run `baton init`)", path.display()));
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if !contents.lines().any(|line| line.trim() == "sessions/") {
        return Err(anyhow!(
            "missing 'sessions/' in {} (run `baton init --force`)",
            path.display()
        ));
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const APP_SPEC_PLACEHOLDER: &str =
    "# Application Spec\n\nDescribe the application the agent should build.\n";
const BATON_GITIGNORE: &str = "sessions/\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_baton(temp.path(), &InitOptions::default()).expect("init");

        assert!(paths.baton_dir.is_dir());
        assert!(paths.sessions_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.app_spec_path.is_file());
        assert!(!paths.registry_path.exists());
        assert!(!paths.journal_path.exists());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            BATON_GITIGNORE
        );
        ensure_gitignore(&paths).expect("gitignore ok");
    }

    #[test]
    fn init_writes_provided_app_spec() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = InitOptions {
            force: false,
            app_spec: Some("# Todo app\n".to_string()),
        };
        let paths = init_baton(temp.path(), &options).expect("init");
        assert_eq!(
            fs::read_to_string(&paths.app_spec_path).expect("spec"),
            "# Todo app\n"
        );
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_baton(temp.path(), &InitOptions::default()).expect("init");
        let err = init_baton(temp.path(), &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn force_never_discards_a_registry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_baton(temp.path(), &InitOptions::default()).expect("init");
        fs::write(&paths.registry_path, "{}").expect("write registry");

        let options = InitOptions {
            force: true,
            app_spec: None,
        };
        let err = init_baton(temp.path(), &options).unwrap_err();
        assert!(err.to_string().contains("task registry"));
    }

    #[test]
    fn session_dirs_are_numbered() {
        let paths = BatonPaths::new("/w");
        assert_eq!(paths.session_dir(7), PathBuf::from("/w/.baton/sessions/7"));
    }
}
