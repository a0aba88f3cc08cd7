//! Shared deterministic types for the engine core.
//!
//! These types define stable contracts between the state machine and its
//! collaborators. They carry no behavior that depends on external state and
//! serialize to the payloads forwarded by transport layers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One entry of the reasoning audit trail.
///
/// Entries are immutable once appended; their order is the causal order of
/// the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub label: String,
    pub detail: String,
}

impl ReasoningStep {
    pub fn new(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            detail: detail.into(),
        }
    }
}

/// Which side of the loop a safety check guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyPhase {
    Input,
    Output,
}

/// Outcome of one SafetyGate checkpoint as recorded in the safety log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub phase: SafetyPhase,
    pub is_safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub should_block: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_revision: Option<bool>,
    /// Diagnostic summary when the gate itself failed and a fallback verdict was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SafetyCheckResult {
    pub fn from_input(verdict: &InputVerdict) -> Self {
        Self {
            phase: SafetyPhase::Input,
            is_safe: verdict.is_safe,
            category: verdict.category.clone(),
            should_block: verdict.should_block,
            needs_revision: None,
            error: verdict.error.clone(),
        }
    }

    pub fn from_output(verdict: &OutputVerdict) -> Self {
        Self {
            phase: SafetyPhase::Output,
            is_safe: verdict.is_safe,
            category: None,
            should_block: verdict.should_block,
            needs_revision: Some(verdict.needs_revision),
            error: verdict.error.clone(),
        }
    }
}

/// Verdict returned by `SafetyGate::check_input`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputVerdict {
    pub is_safe: bool,
    pub category: Option<String>,
    pub should_block: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InputVerdict {
    pub fn allow() -> Self {
        Self {
            is_safe: true,
            category: Some("safe".to_string()),
            should_block: false,
            error: None,
        }
    }

    pub fn block(category: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            category: Some(category.into()),
            should_block: true,
            error: None,
        }
    }

    /// Verdict used when the gate could not evaluate the input: block it.
    pub fn fail_closed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::block("error")
        }
    }
}

/// Verdict returned by `SafetyGate::check_output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputVerdict {
    pub is_safe: bool,
    pub should_block: bool,
    pub needs_revision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutputVerdict {
    pub fn allow() -> Self {
        Self {
            is_safe: true,
            should_block: false,
            needs_revision: false,
            error: None,
        }
    }

    /// Verdict used when the gate could not evaluate the answer: deliver it.
    pub fn fail_open(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::allow()
        }
    }
}

/// A retrieved log entry plus its similarity distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Lower is closer. `None` when the store does not report distances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl ContextItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
            distance: None,
        }
    }

    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = Some(distance);
        self
    }
}

/// Planner vocabulary for the next action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DataRetrieval,
    WebSearch,
    Analysis,
    FinalAnswer,
    Other(String),
}

impl ActionKind {
    /// Parse a free-form planner label such as `"Data_Retrieval"` or `"final answer"`.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .trim_matches(|c| c == '[' || c == ']' || c == '`' || c == '"')
            .to_ascii_lowercase()
            .replace([' ', '-'], "_");
        match normalized.as_str() {
            "data_retrieval" | "retrieval" | "retrieve" => Self::DataRetrieval,
            "web_search" | "search" => Self::WebSearch,
            "analysis" | "analyze" => Self::Analysis,
            "final_answer" | "answer" => Self::FinalAnswer,
            _ => Self::Other(normalized),
        }
    }

    pub fn as_label(&self) -> &str {
        match self {
            Self::DataRetrieval => "data_retrieval",
            Self::WebSearch => "web_search",
            Self::Analysis => "analysis",
            Self::FinalAnswer => "final_answer",
            Self::Other(label) => label,
        }
    }
}

/// Planner output: the proposed next action and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub rationale: String,
    pub action: ActionKind,
}

/// Observer output: what was learned and whether it is enough to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    pub observation: String,
    pub is_sufficient: bool,
}

/// Lifecycle tag of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminal {
    Running,
    Completed,
    Blocked,
    Failed,
}

impl Terminal {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// Terminal projection of a run, returned by `run` and carried by the last stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub success: bool,
    pub query: String,
    pub response: String,
    pub terminal: Terminal,
    pub reasoning_log: Vec<ReasoningStep>,
    pub safety_log: Vec<SafetyCheckResult>,
    pub react_cycles: u32,
    pub retrieved_entry_count: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_parses_planner_labels() {
        assert_eq!(ActionKind::from_label("data_retrieval"), ActionKind::DataRetrieval);
        assert_eq!(ActionKind::from_label(" [Web Search] "), ActionKind::WebSearch);
        assert_eq!(ActionKind::from_label("FINAL-ANSWER"), ActionKind::FinalAnswer);
        assert_eq!(
            ActionKind::from_label("ask a friend"),
            ActionKind::Other("ask_a_friend".to_string())
        );
    }

    #[test]
    fn fail_closed_blocks_with_error_category() {
        let verdict = InputVerdict::fail_closed("classifier down");
        assert!(!verdict.is_safe);
        assert!(verdict.should_block);
        assert_eq!(verdict.category.as_deref(), Some("error"));
        assert_eq!(verdict.error.as_deref(), Some("classifier down"));
    }

    #[test]
    fn fail_open_allows_and_keeps_error() {
        let verdict = OutputVerdict::fail_open("classifier down");
        assert!(verdict.is_safe);
        assert!(!verdict.should_block);
        assert!(!verdict.needs_revision);
        assert_eq!(verdict.error.as_deref(), Some("classifier down"));
    }

    #[test]
    fn safety_check_result_serializes_without_empty_fields() {
        let check = SafetyCheckResult::from_input(&InputVerdict::allow());
        let json = serde_json::to_value(&check).expect("serialize");
        assert_eq!(json["phase"], "input");
        assert_eq!(json["category"], "safe");
        assert!(json.get("needs_revision").is_none());
        assert!(json.get("error").is_none());
    }
}
