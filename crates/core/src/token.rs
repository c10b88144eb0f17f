//! Embedded token extraction from process output.
//!
//! Deploy scripts print a `DEPLOYMENT_ID=<token>` marker so that a job can
//! be correlated with the external deployment it started.

use std::sync::LazyLock;

use regex::Regex;

/// Regex pattern matching the deployment id marker.
pub const TOKEN_PATTERN: &str = r"DEPLOYMENT_ID=(\S+)";

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TOKEN_PATTERN).expect("valid regex"));

/// Extract the embedded token from a single output line, if present.
pub fn extract_token(line: &str) -> Option<&str> {
    TOKEN_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
