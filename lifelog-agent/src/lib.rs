//! Safety-gated ReAct engine for answering questions about personal log data.
//!
//! A query passes an input safety check, runs a bounded number of
//! reason/act/observe cycles against a retriever, is answered by a
//! synthesizer, and passes an output safety check. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (run state, loop-exit policy,
//!   transition table, invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: The collaborator traits the engine calls through, plus
//!   config and scenario files.
//!
//! [`engine`] drives the state machine; [`stream`] delivers its progress.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use engine::{EngineInfo, Execution, ReActEngine};
pub use error::EngineError;
pub use stream::{Event, EventKind, RunStream};
