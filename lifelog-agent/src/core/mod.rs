//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod invariants;
pub mod messages;
pub mod policy;
pub mod run_state;
pub mod transitions;
pub mod types;
