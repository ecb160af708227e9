//! Verifier adapter: runs the project's check command for one task.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::types::VerifyOutcome;
use crate::io::process::{run_command_with_timeout, write_bounded_log};
use crate::task::Task;

/// Red/green position of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPhase {
    /// Before the agent works; the task's checks are expected to fail.
    Pre,
    /// After the agent claims the task; the checks are expected to pass.
    Post,
}

impl VerifyPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub workdir: PathBuf,
    pub task: Task,
    pub phase: VerifyPhase,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

pub trait Verifier {
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome>;
}

/// Runs `verify.command` with the task exported through the environment.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    command: Vec<String>,
}

impl CommandVerifier {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(task_id = %request.task.id, phase = request.phase.as_str()))]
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("verify.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&request.workdir)
            .env("BATON_TASK_ID", &request.task.id)
            .env("BATON_TASK_STEPS", request.task.steps.join("\n"))
            .env("BATON_PHASE", request.phase.as_str());

        // A verifier that cannot run counts as failing checks.
        let output = match run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "verifier could not run");
                write_bounded_log(
                    &request.log_path,
                    &format!("verifier could not run: {err:#}\n"),
                    request.output_limit_bytes,
                )?;
                return Ok(VerifyOutcome::Fail);
            }
        };
        write_bounded_log(
            &request.log_path,
            &output.render("verify"),
            request.output_limit_bytes,
        )?;

        let outcome = if output.success() {
            VerifyOutcome::Pass
        } else {
            VerifyOutcome::Fail
        };
        info!(outcome = ?outcome, "verification finished");
        Ok(outcome)
    }
}

/// Post-check only runs when the agent claimed the selected task.
pub fn verify_if_claimed<V: Verifier + ?Sized>(
    claimed: bool,
    verifier: &V,
    request: &VerifyRequest,
) -> Result<VerifyOutcome> {
    if !claimed {
        return Ok(VerifyOutcome::Skipped);
    }
    verifier.verify(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;
    use std::fs;

    struct FakeVerifier {
        outcome: VerifyOutcome,
    }

    impl Verifier for FakeVerifier {
        fn verify(&self, _request: &VerifyRequest) -> Result<VerifyOutcome> {
            Ok(self.outcome)
        }
    }

    fn request(dir: &std::path::Path, phase: VerifyPhase) -> VerifyRequest {
        let mut t = task("T2", "login form");
        t.steps = vec!["open /login".to_string(), "submit".to_string()];
        VerifyRequest {
            workdir: dir.to_path_buf(),
            task: t,
            phase,
            log_path: dir.join("verify.log"),
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1_000,
        }
    }

    #[test]
    fn skips_unclaimed_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = FakeVerifier {
            outcome: VerifyOutcome::Pass,
        };
        let outcome = verify_if_claimed(false, &verifier, &request(temp.path(), VerifyPhase::Post))
            .expect("verify");
        assert_eq!(outcome, VerifyOutcome::Skipped);
    }

    #[test]
    fn runs_claimed_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = FakeVerifier {
            outcome: VerifyOutcome::Fail,
        };
        let outcome = verify_if_claimed(true, &verifier, &request(temp.path(), VerifyPhase::Post))
            .expect("verify");
        assert_eq!(outcome, VerifyOutcome::Fail);
    }

    #[test]
    fn command_verifier_exports_task_and_phase() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"echo "$BATON_TASK_ID $BATON_PHASE"; echo "$BATON_TASK_STEPS"; test "$BATON_PHASE" = post"#;
        let verifier = CommandVerifier::new(vec!["sh".into(), "-c".into(), script.into()]);

        let pre = request(temp.path(), VerifyPhase::Pre);
        assert_eq!(verifier.verify(&pre).expect("pre"), VerifyOutcome::Fail);
        let post = request(temp.path(), VerifyPhase::Post);
        assert_eq!(verifier.verify(&post).expect("post"), VerifyOutcome::Pass);

        let log = fs::read_to_string(&post.log_path).expect("log");
        assert!(log.contains("T2 post"));
        assert!(log.contains("open /login\nsubmit"));
    }

    #[test]
    fn missing_verifier_counts_as_failing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = CommandVerifier::new(vec!["baton-no-such-verifier".into()]);
        let req = request(temp.path(), VerifyPhase::Post);
        assert_eq!(verifier.verify(&req).expect("verify"), VerifyOutcome::Fail);
        assert!(
            fs::read_to_string(&req.log_path)
                .expect("log")
                .contains("could not run")
        );
    }
}
