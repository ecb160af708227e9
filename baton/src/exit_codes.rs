//! Stable exit codes for baton CLI commands.

/// Command succeeded: `run` completed every task, or `select` found an open task.
pub const OK: i32 = 0;
/// Unrecoverable error (invalid layout/config/registry, git failure, persistence).
pub const ERROR: i32 = 1;
/// `baton select` found no open task because every task passes.
pub const COMPLETE: i32 = 2;
/// No selectable task remains and at least one task never passed.
pub const BLOCKED: i32 = 3;
/// `baton run` stopped at `max_sessions` with work remaining.
pub const MAX_SESSIONS: i32 = 4;
