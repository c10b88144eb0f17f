//! Formatting of the diagnostic lines written into a job's output trail.
//!
//! The output trail is the only diagnostic record a job has, so every
//! marker line is produced here to keep the format consistent.

/// Line recording the exact command about to run.
pub fn command_line(argv: &[String]) -> String {
    format!("$ {}", argv.join(" "))
}

/// Line recorded when a process exits with a non-zero code.
pub fn exit_code_line(code: i32) -> String {
    format!("[EXIT CODE: {code}]")
}

/// Line recorded for configuration and launch errors.
pub fn error_line(message: impl std::fmt::Display) -> String {
    format!("[ERROR: {message}]")
}

/// Line recorded when a best-effort step fails.
pub fn warning_line(message: impl std::fmt::Display) -> String {
    format!("[Warning: {message}]")
}

/// Banner written when the engine starts a job.
pub fn start_banner(action: &str, target: &str) -> String {
    format!("=== {action} {target} started ===")
}

/// Banner written when a job reaches its terminal state.
pub fn exit_banner(action: &str, target: &str, status: &str) -> String {
    format!("=== {action} {target} {status} ===")
}

/// Whether `line` is an `[EXIT CODE: n]` marker.
pub fn is_exit_code_line(line: &str) -> bool {
    line.starts_with("[EXIT CODE: ")
}
