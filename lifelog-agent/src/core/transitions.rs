//! Named transition table of the engine's finite-state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    #[serde(rename = "safety_check_input")]
    InputSafety,
    #[serde(rename = "react_reason")]
    Reason,
    #[serde(rename = "react_act")]
    Act,
    #[serde(rename = "react_observe")]
    Observe,
    #[serde(rename = "synthesize_response")]
    Synthesize,
    #[serde(rename = "safety_check_output")]
    OutputSafety,
    Done,
}

impl Node {
    pub const ENTRY: Node = Node::InputSafety;

    pub fn name(self) -> &'static str {
        match self {
            Self::InputSafety => "safety_check_input",
            Self::Reason => "react_reason",
            Self::Act => "react_act",
            Self::Observe => "react_observe",
            Self::Synthesize => "synthesize_response",
            Self::OutputSafety => "safety_check_output",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome a node reports to select its outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Proceed,
    Blocked,
    Continue,
    Exit,
}

/// `(from, signal, to)` edges. Any pair missing here is a programming error.
pub const TRANSITIONS: &[(Node, Signal, Node)] = &[
    (Node::InputSafety, Signal::Proceed, Node::Reason),
    (Node::InputSafety, Signal::Blocked, Node::Done),
    (Node::Reason, Signal::Proceed, Node::Act),
    (Node::Act, Signal::Proceed, Node::Observe),
    (Node::Observe, Signal::Continue, Node::Reason),
    (Node::Observe, Signal::Exit, Node::Synthesize),
    (Node::Synthesize, Signal::Proceed, Node::OutputSafety),
    (Node::OutputSafety, Signal::Proceed, Node::Done),
];

/// Look up the successor of `from` under `signal`.
pub fn next(from: Node, signal: Signal) -> Option<Node> {
    TRANSITIONS
        .iter()
        .find(|(node, edge, _)| *node == from && *edge == signal)
        .map(|(_, _, to)| *to)
}
