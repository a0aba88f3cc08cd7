//! Error taxonomy for engine construction and runs.
//!
//! A blocked input is not an error: it ends the run with
//! [`Terminal::Blocked`](crate::core::types::Terminal::Blocked).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External capability the engine calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    SafetyGate,
    Planner,
    Retriever,
    Observer,
    Synthesizer,
}

impl Collaborator {
    pub const ALL: [Collaborator; 5] = [
        Collaborator::SafetyGate,
        Collaborator::Planner,
        Collaborator::Retriever,
        Collaborator::Observer,
        Collaborator::Synthesizer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafetyGate => "safety_gate",
            Self::Planner => "planner",
            Self::Retriever => "retriever",
            Self::Observer => "observer",
            Self::Synthesizer => "synthesizer",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// A collaborator returned an error or exceeded the per-call timeout.
    #[error("{collaborator} call failed: {message}")]
    ExternalCall {
        collaborator: Collaborator,
        message: String,
    },

    #[error("run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("query must not be empty")]
    EmptyQuery,

    /// A terminal RunState was mutated. Indicates an engine bug.
    #[error("run state is sealed; refusing to {0}")]
    Sealed(&'static str),

    /// The transition table has no edge for a node's outcome. Indicates an engine bug.
    #[error("invalid state transition: {0}")]
    Transition(String),
}

impl EngineError {
    pub fn external(collaborator: Collaborator, err: &anyhow::Error) -> Self {
        Self::ExternalCall {
            collaborator,
            message: format!("{err:#}"),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
