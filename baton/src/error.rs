//! Domain error taxonomy for the orchestrator.
//!
//! Orchestration code propagates `anyhow::Error`; callers that need to react to
//! a specific condition recover it with `err.downcast_ref::<BatonError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatonError {
    #[error("task registry already initialized ({existing} tasks)")]
    AlreadyInitialized { existing: usize },

    #[error("task '{id}' not found")]
    NotFound { id: String },

    #[error("task '{id}' already passes")]
    AlreadyPassed { id: String },

    #[error("immutable field violation: {}", .violations.join("; "))]
    ImmutableFieldViolation { violations: Vec<String> },

    #[error("persistence error on {}: {message}", .path.display())]
    PersistenceError { path: PathBuf, message: String },

    #[error("nothing to commit since the last checkpoint")]
    NothingToCommit,

    #[error("initialization required: {reason}")]
    InitializationRequired { reason: String },

    #[error("sandbox violation: '{path}' {reason}")]
    SandboxViolation { path: String, reason: String },

    #[error("scope violation: session is scoped to '{selected}' but touched '{attempted}'")]
    ScopeViolation { selected: String, attempted: String },

    #[error("task '{id}' exhausted {attempts}/{max_attempts} attempts")]
    LoopExceeded {
        id: String,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("tool call '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("verification mismatch for '{id}': {detail}")]
    VerificationMismatch { id: String, detail: String },
}

impl BatonError {
    pub fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::PersistenceError {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Violations the gate absorbs into the session narrative instead of failing the session.
    pub fn is_tool_local(&self) -> bool {
        matches!(
            self,
            Self::SandboxViolation { .. }
                | Self::ScopeViolation { .. }
                | Self::ToolTimeout { .. }
                | Self::ImmutableFieldViolation { .. }
                | Self::AlreadyInitialized { .. }
                | Self::NotFound { .. }
                | Self::AlreadyPassed { .. }
        )
    }

    /// Stable machine-readable name, used in session logs and journal narratives.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized { .. } => "AlreadyInitialized",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyPassed { .. } => "AlreadyPassed",
            Self::ImmutableFieldViolation { .. } => "ImmutableFieldViolation",
            Self::PersistenceError { .. } => "PersistenceError",
            Self::NothingToCommit => "NothingToCommit",
            Self::InitializationRequired { .. } => "InitializationRequired",
            Self::SandboxViolation { .. } => "SandboxViolation",
            Self::ScopeViolation { .. } => "ScopeViolation",
            Self::LoopExceeded { .. } => "LoopExceeded",
            Self::ToolTimeout { .. } => "ToolTimeout",
            Self::VerificationMismatch { .. } => "VerificationMismatch",
        }
    }
}

/// Return the domain error carried by `err`, if any.
pub fn as_baton(err: &anyhow::Error) -> Option<&BatonError> {
    err.downcast_ref::<BatonError>()
}
