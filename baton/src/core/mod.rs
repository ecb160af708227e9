//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod immutability;
pub mod invariants;
pub mod outcome;
pub mod registry;
pub mod sandbox;
pub mod selector;
pub mod types;
