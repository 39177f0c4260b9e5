//! Terminal color sequence stripping.
//!
//! Kernels colorize tracebacks with CSI sequences (`ESC [ 0;31m ...`). Agents
//! read plain text, so error messages and traces are stripped before display.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `ESC [` followed by numeric parameters and a final letter.
static CSI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("Invalid regex pattern for CSI"));

/// Remove terminal color/cursor sequences from `text`.
pub fn strip_ansi(text: &str) -> String {
    CSI_PATTERN.replace_all(text, "").into_owned()
}
