//! Loop-exit policy evaluated after every Observe.

use serde::{Deserialize, Serialize};

/// Inputs to the loop-exit decision, read after the cycle was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSignals {
    pub iteration: u32,
    pub max_iterations: u32,
    pub observer_sufficient: bool,
    pub observation_count: usize,
    pub has_context: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Rule (a): the iteration bound was reached.
    MaxIterations,
    /// Rule (b): the Observer judged the evidence sufficient.
    Sufficient,
    /// Rule (c): two observations and some context exist.
    EvidenceThreshold,
}

impl ExitReason {
    pub fn describe(self) -> &'static str {
        match self {
            Self::MaxIterations => "reached the iteration limit",
            Self::Sufficient => "observer judged the information sufficient",
            Self::EvidenceThreshold => "enough observations and retrieved entries collected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Continue,
    Exit(ExitReason),
}

impl LoopDecision {
    pub fn should_continue(self) -> bool {
        self == Self::Continue
    }
}

/// Minimum observations before rule (c) may end the loop.
pub const EVIDENCE_MIN_OBSERVATIONS: usize = 2;

/// Decide whether to run another ReAct cycle. Rules are checked in order.
///
/// Rule (c) overrides an undecided Observer once two observations and any
/// context exist. Suspect: it may be an unintended shortcut rather than
/// policy. Changing it changes when runs terminate.
pub fn decide(signals: LoopSignals) -> LoopDecision {
    if signals.iteration >= signals.max_iterations {
        return LoopDecision::Exit(ExitReason::MaxIterations);
    }
    if signals.observer_sufficient {
        return LoopDecision::Exit(ExitReason::Sufficient);
    }
    if signals.observation_count >= EVIDENCE_MIN_OBSERVATIONS && signals.has_context {
        return LoopDecision::Exit(ExitReason::EvidenceThreshold);
    }
    LoopDecision::Continue
}
