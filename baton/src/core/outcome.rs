//! Red/green verdict for a Coder session.

use crate::core::types::{SessionOutcome, VerifyOutcome};

/// What the orchestrator does with a finished Coder session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: SessionOutcome,
    /// Flip `passes` for the selected task.
    pub mark_passed: bool,
    /// Set when verification disagreed with the expected red/green sequence.
    pub mismatch: Option<String>,
}

/// Inputs to [`judge_coder_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvidence {
    /// The agent called `mark_passed` for the selected task.
    pub claimed: bool,
    pub pre: VerifyOutcome,
    pub post: VerifyOutcome,
    /// Attempt count after this session's increment.
    pub attempts: u32,
    pub max_attempts: u32,
    pub require_failing_precheck: bool,
}

/// Decide the session outcome from agent claim and verification results.
///
/// A task only passes when the agent claimed it and the post-check passed.
/// When `require_failing_precheck` is set, a pre-check that already passes is
/// reported as a mismatch and nothing is marked. Every non-committed session
/// ends as `loop-exceeded` once the attempt budget is spent.
pub fn judge_coder_session(evidence: &SessionEvidence) -> Verdict {
    let unsuccessful = |mismatch: Option<String>| Verdict {
        outcome: if evidence.attempts >= evidence.max_attempts {
            SessionOutcome::LoopExceeded
        } else {
            SessionOutcome::NoOp
        },
        mark_passed: false,
        mismatch,
    };

    if evidence.require_failing_precheck && evidence.pre == VerifyOutcome::Pass {
        return unsuccessful(Some(
            "pre-check passed before any work; expected it to fail".to_string(),
        ));
    }
    if !evidence.claimed {
        return unsuccessful(None);
    }
    if evidence.post != VerifyOutcome::Pass {
        return unsuccessful(Some(
            "agent claimed the task but the post-check did not pass".to_string(),
        ));
    }
    Verdict {
        outcome: SessionOutcome::Committed,
        mark_passed: true,
        mismatch: None,
    }
}
