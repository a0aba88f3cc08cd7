//! Invariants of a finished RunState that the type alone cannot express.

use crate::core::run_state::RunState;
use crate::core::types::{SafetyPhase, Terminal};

/// Check a finished run:
/// - it reached exactly one terminal state with a response
/// - `iteration <= max_iterations` and one observation per cycle
/// - Completed runs logged one input check then one output check
/// - Blocked runs logged only the input check and never entered the loop
/// - Failed runs carry a diagnostic
pub fn validate_invariants(state: &RunState, max_iterations: u32) -> Vec<String> {
    let mut errors = Vec::new();

    if !state.terminal().is_terminal() {
        errors.push("run did not reach a terminal state".to_string());
    }
    if state.terminal().is_terminal() && state.response().is_empty() {
        errors.push(format!("{:?} run has an empty response", state.terminal()));
    }
    if state.iteration() > max_iterations {
        errors.push(format!(
            "iteration {} exceeds max_iterations {}",
            state.iteration(),
            max_iterations
        ));
    }
    if state.observations().len() != state.iteration() as usize {
        errors.push(format!(
            "{} observations recorded for {} cycles",
            state.observations().len(),
            state.iteration()
        ));
    }

    let phases: Vec<SafetyPhase> = state.safety_log().iter().map(|c| c.phase).collect();
    match state.terminal() {
        Terminal::Completed => {
            if phases != [SafetyPhase::Input, SafetyPhase::Output] {
                errors.push(format!(
                    "completed run must log input then output safety checks, got {phases:?}"
                ));
            }
        }
        Terminal::Blocked => {
            if phases != [SafetyPhase::Input] {
                errors.push(format!(
                    "blocked run must log only the input safety check, got {phases:?}"
                ));
            }
            if !state.retrieved_context().is_empty() {
                errors.push("blocked run retrieved context".to_string());
            }
            if !state.observations().is_empty() {
                errors.push("blocked run recorded observations".to_string());
            }
        }
        Terminal::Failed => {
            if state.error().is_none() {
                errors.push("failed run has no error diagnostic".to_string());
            }
        }
        Terminal::Running => {}
    }

    errors
}
