//! Process execution interface and shared types.
//!
//! Defines [`ProcessSpec`] (what to run), [`OutputSink`] (where streamed
//! lines go), [`ProcessError`], and [`ProcessExecutor`], which turns a single
//! command into a success/failure signal while recording its output trail.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::subprocess;
use crate::output;

/// A single command to run as a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (uses current dir if `None`).
    pub working_directory: Option<PathBuf>,
    /// Optional wall-clock limit. `None` runs until the process exits.
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
            working_directory: None,
            timeout: None,
        }
    }

    /// Build a spec from an argument vector (`argv[0]` is the program).
    ///
    /// Returns `None` for an empty vector.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, vars: Vec<(String, String)>) -> Self {
        self.env_vars.extend(vars);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The full argument vector, program first.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Receiver of a running process's merged output.
///
/// Implemented by the engine's job handle so that lines become visible to
/// pollers as soon as they are produced.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Append one decoded output line.
    async fn push_line(&self, line: String);

    /// Offer an embedded token. Returns `true` if it was stored.
    async fn capture_token(&self, token: String) -> bool;
}

/// Errors that prevent a process from running to a normal exit.
#[derive(Debug)]
pub enum ProcessError {
    /// The program could not be found.
    NotFound(String),
    /// The program exists but lacks execute permissions.
    PermissionDenied(String),
    /// The process exceeded its timeout and was killed.
    Timeout {
        /// Elapsed wall-clock time before the process was killed.
        elapsed_ms: u64,
    },
    /// An I/O error occurred while spawning or waiting on the process.
    IoError(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(program) => write!(f, "Command not found: {program}"),
            Self::PermissionDenied(program) => write!(f, "Permission denied: {program}"),
            Self::Timeout { elapsed_ms } => {
                write!(f, "Command timed out after {elapsed_ms}ms")
            }
            Self::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            _ => None,
        }
    }
}

/// Runs one command and records its output trail into an [`OutputSink`].
///
/// Never mutates a job's status: callers decide what the returned flag
/// means for their action kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Run `spec`, streaming its merged output into `sink`.
    ///
    /// Returns `true` on exit code `0`. A non-zero exit appends an
    /// `[EXIT CODE: n]` line; a launch failure or timeout appends an
    /// `[ERROR: ...]` line. No error escapes this call.
    pub async fn run(&self, spec: ProcessSpec, sink: &dyn OutputSink) -> bool {
        let argv = spec.argv();
        sink.push_line(output::command_line(&argv)).await;

        match subprocess::run_command(&spec, sink).await {
            Ok(0) => true,
            Ok(code) => {
                tracing::debug!(
                    program = %spec.program,
                    exit_code = code,
                    "Process exited non-zero"
                );
                sink.push_line(output::exit_code_line(code)).await;
                false
            }
            Err(e) => {
                tracing::warn!(program = %spec.program, error = %e, "Process could not complete");
                sink.push_line(output::error_line(&e)).await;
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
