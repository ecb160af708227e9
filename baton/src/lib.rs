//! Durable session orchestrator for a stateless coding agent.
//!
//! An external agent builds an application across many independent sessions.
//! It remembers nothing between them; everything it knows comes from three
//! durable stores kept in the project itself: the task registry
//! (`.baton/tasks.json`), the progress journal (`.baton/progress.jsonl`) and
//! git checkpoints. The crate enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (registry rules, selection,
//!   verdicts, path classification). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution,
//!   agent and verifier backends). Isolated to enable fakes in tests.
//!
//! Orchestration modules ([`bootstrap`], [`guardrail`], [`tools`], [`session`],
//! [`orchestrator`], [`recovery`], [`status`], [`select`], [`validate`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod bootstrap;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod guardrail;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod recovery;
pub mod select;
pub mod session;
pub mod status;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod validate;
