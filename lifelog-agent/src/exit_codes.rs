//! Stable exit codes for `lifelog-agent` commands.

use crate::core::types::Terminal;

/// Command succeeded; for `run`/`stream`, the query completed.
pub const OK: i32 = 0;
/// Invalid arguments, config or scenario file.
pub const INVALID: i32 = 1;
/// The input safety check refused the query.
pub const BLOCKED: i32 = 2;
/// The run failed (collaborator error, timeout, cancellation).
pub const FAILED: i32 = 3;

/// Exit code for a finished run.
pub fn for_terminal(terminal: Terminal) -> i32 {
    match terminal {
        Terminal::Completed => OK,
        Terminal::Blocked => BLOCKED,
        Terminal::Failed | Terminal::Running => FAILED,
    }
}
