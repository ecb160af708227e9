//! I/O helpers for baton commands.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod environment;
pub mod git;
pub mod init;
pub mod journal;
pub mod process;
pub mod prompt;
pub mod registry_store;
pub mod session_log;
pub mod verifier;
