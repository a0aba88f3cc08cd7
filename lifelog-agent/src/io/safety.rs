//! SafetyGate backed by a content-moderation classifier.
//!
//! The classifier answers in a fixed line format:
//!
//! ```text
//! SAFE: NO
//! CATEGORY: medical_advice
//! ACTION: BLOCK
//! ```
//!
//! Output reviews use `RECOMMENDATION: ALLOW|MODIFY|BLOCK` instead of `ACTION`.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use crate::core::types::{InputVerdict, OutputVerdict};
use crate::io::collaborators::SafetyGate;

static SAFE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*SAFE\s*:\s*(YES|NO)\b").expect("valid SAFE regex")
});
static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*ACTION\s*:\s*(ALLOW|BLOCK)\b").expect("valid ACTION regex")
});
static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*CATEGORY\s*:\s*(.+?)\s*$").expect("valid CATEGORY regex")
});
static RECOMMENDATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*RECOMMENDATION\s*:\s*(ALLOW|MODIFY|BLOCK)\b")
        .expect("valid RECOMMENDATION regex")
});

/// Raw moderation replies for a piece of text.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn classify_input(&self, text: &str) -> Result<String>;
    async fn classify_output(&self, text: &str, context: &str) -> Result<String>;
}

pub struct ClassifierSafetyGate<C> {
    classifier: C,
}

impl<C: SafetyClassifier> ClassifierSafetyGate<C> {
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl<C: SafetyClassifier> SafetyGate for ClassifierSafetyGate<C> {
    #[instrument(skip_all, fields(len = text.len()))]
    async fn check_input(&self, text: &str) -> Result<InputVerdict> {
        let reply = self
            .classifier
            .classify_input(text)
            .await
            .context("classify input")?;
        let verdict = parse_input_reply(&reply);
        debug!(is_safe = verdict.is_safe, should_block = verdict.should_block, "input classified");
        Ok(verdict)
    }

    #[instrument(skip_all, fields(len = text.len()))]
    async fn check_output(&self, text: &str, context: &str) -> Result<OutputVerdict> {
        let reply = self
            .classifier
            .classify_output(text, context)
            .await
            .context("classify output")?;
        let verdict = parse_output_reply(&reply);
        debug!(
            is_safe = verdict.is_safe,
            should_block = verdict.should_block,
            needs_revision = verdict.needs_revision,
            "output classified"
        );
        Ok(verdict)
    }
}

/// Reduce an input moderation reply to a verdict.
///
/// A reply without `SAFE: YES` is unsafe; only an explicit `ACTION: BLOCK`
/// blocks.
pub fn parse_input_reply(reply: &str) -> InputVerdict {
    let said_safe = capture_upper(&SAFE_RE, reply).as_deref() == Some("YES");
    let should_block = capture_upper(&ACTION_RE, reply).as_deref() == Some("BLOCK");
    let category = if said_safe {
        "safe".to_string()
    } else {
        CATEGORY_RE
            .captures(reply)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    };
    InputVerdict {
        is_safe: said_safe && !should_block,
        category: Some(category),
        should_block,
        error: None,
    }
}

/// Reduce an output moderation reply to a verdict.
pub fn parse_output_reply(reply: &str) -> OutputVerdict {
    let said_safe = capture_upper(&SAFE_RE, reply).as_deref() == Some("YES");
    let recommendation = capture_upper(&RECOMMENDATION_RE, reply);
    let should_block = recommendation.as_deref() == Some("BLOCK");
    OutputVerdict {
        is_safe: said_safe && !should_block,
        should_block,
        needs_revision: recommendation.as_deref() == Some("MODIFY"),
        error: None,
    }
}

fn capture_upper(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn parses_safe_input() {
        let verdict = parse_input_reply(
            "SAFE: YES\nCATEGORY: safe\nSEVERITY: NONE\nEXPLANATION: fine\nACTION: ALLOW",
        );
        assert!(verdict.is_safe);
        assert!(!verdict.should_block);
        assert_eq!(verdict.category.as_deref(), Some("safe"));
    }

    #[test]
    fn parses_blocked_input_category() {
        let verdict = parse_input_reply(
            "SAFE: NO\nCATEGORY: Medical_Advice\nSEVERITY: HIGH\nACTION: BLOCK",
        );
        assert!(!verdict.is_safe);
        assert!(verdict.should_block);
        assert_eq!(verdict.category.as_deref(), Some("medical_advice"));
    }

    #[test]
    fn tolerates_missing_space_and_lowercase() {
        let verdict = parse_input_reply("safe:no\naction:block");
        assert!(verdict.should_block);
        assert_eq!(verdict.category.as_deref(), Some("unknown"));
    }

    #[test]
    fn unsafe_without_block_is_not_blocked() {
        let verdict = parse_input_reply("SAFE: NO\nCATEGORY: off_topic\nACTION: ALLOW");
        assert!(!verdict.is_safe);
        assert!(!verdict.should_block);
    }

    #[test]
    fn parses_output_recommendations() {
        let ok = parse_output_reply("SAFE: YES\nISSUES: none\nRECOMMENDATION: ALLOW");
        assert!(ok.is_safe && !ok.should_block && !ok.needs_revision);

        let modify = parse_output_reply("SAFE: NO\nISSUES: tone\nRECOMMENDATION: MODIFY");
        assert!(!modify.is_safe && !modify.should_block && modify.needs_revision);

        let block = parse_output_reply("SAFE: YES\nRECOMMENDATION: BLOCK");
        assert!(!block.is_safe && block.should_block);
    }

    struct CannedClassifier {
        input: Result<String, String>,
    }

    #[async_trait]
    impl SafetyClassifier for CannedClassifier {
        async fn classify_input(&self, _text: &str) -> Result<String> {
            self.input.clone().map_err(|e| anyhow!(e))
        }

        async fn classify_output(&self, _text: &str, _context: &str) -> Result<String> {
            Ok("SAFE: YES\nRECOMMENDATION: ALLOW".to_string())
        }
    }

    #[tokio::test]
    async fn gate_parses_classifier_reply() {
        let gate = ClassifierSafetyGate::new(CannedClassifier {
            input: Ok("SAFE: NO\nCATEGORY: self_harm\nACTION: BLOCK".to_string()),
        });
        let verdict = gate.check_input("text").await.expect("verdict");
        assert!(verdict.should_block);
        assert_eq!(verdict.category.as_deref(), Some("self_harm"));

        let output = gate.check_output("answer", "q").await.expect("verdict");
        assert!(output.is_safe);
    }

    #[tokio::test]
    async fn gate_propagates_classifier_errors_with_context() {
        let gate = ClassifierSafetyGate::new(CannedClassifier {
            input: Err("rate limited".to_string()),
        });
        let err = gate.check_input("text").await.expect_err("error");
        assert_eq!(format!("{err:#}"), "classify input: rate limited");
    }
}
