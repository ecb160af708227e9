//! Environment bring-up: runs the project's init script before a session.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::io::process::run_command_to_log;

/// What happened when the init script ran. Failures are reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnvironmentStatus {
    /// No script at the configured path (normal before the Initializer ran).
    Missing,
    Ready,
    Failed { detail: String },
    /// The script exists but was deliberately not run (`baton context`).
    NotRun,
}

impl EnvironmentStatus {
    pub fn describe(&self) -> String {
        match self {
            Self::Missing => "init script not present".to_string(),
            Self::Ready => "init script succeeded".to_string(),
            Self::Failed { detail } => format!("init script failed: {detail}"),
            Self::NotRun => "init script present, not run for this preview".to_string(),
        }
    }
}

/// Run `script` with `sh` from `root`, appending output to `log_path`.
#[instrument(skip_all, fields(script = %script.display()))]
pub fn bring_up(
    root: &Path,
    script: &Path,
    timeout: Duration,
    log_path: &Path,
) -> Result<EnvironmentStatus> {
    if !script.is_file() {
        return Ok(EnvironmentStatus::Missing);
    }
    let mut cmd = Command::new("sh");
    cmd.arg(script).current_dir(root);
    let status = match run_command_to_log(cmd, timeout, log_path) {
        Ok(run) if run.success() => EnvironmentStatus::Ready,
        Ok(run) if run.timed_out => EnvironmentStatus::Failed {
            detail: format!("timed out after {}s", timeout.as_secs()),
        },
        Ok(run) => EnvironmentStatus::Failed {
            detail: format!("exit code {:?}", run.status.code()),
        },
        Err(err) => EnvironmentStatus::Failed {
            detail: format!("{err:#}"),
        },
    };
    match &status {
        EnvironmentStatus::Failed { detail } => {
            warn!(detail = %detail, "environment bring-up failed");
        }
        _ => info!("environment ready"),
    }
    Ok(status)
}
