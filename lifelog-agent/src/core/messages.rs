//! Fixed user-facing strings.

/// Longest diagnostic summary embedded in an apology.
pub const MAX_DIAGNOSTIC_CHARS: usize = 160;

/// Response returned when the SafetyGate blocks the input.
pub fn input_refusal(category: &str) -> String {
    format!(
        "I'm sorry, but I can't help with that request (flagged as: {category}). \
         I can help you explore patterns and trends in your personal log data, \
         for example how your sleep relates to your mood."
    )
}

/// Response that replaces an answer blocked by the output check.
pub const OUTPUT_FALLBACK: &str = "I'm sorry, but I can't share that response. \
     For medical, financial or other professional concerns, please consult a qualified expert. \
     I'm happy to help you look at patterns in your personal log data instead.";

/// Response for a failed run. Only a short summary of the error is embedded.
pub fn apology(error: &str) -> String {
    format!(
        "Sorry, I encountered an error: {}",
        diagnostic_summary(error)
    )
}

/// First line of `error`, truncated to [`MAX_DIAGNOSTIC_CHARS`].
pub fn diagnostic_summary(error: &str) -> String {
    let first_line = error.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= MAX_DIAGNOSTIC_CHARS {
        return first_line.to_string();
    }
    let mut truncated: String = first_line.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
    truncated.push_str("...");
    truncated
}
