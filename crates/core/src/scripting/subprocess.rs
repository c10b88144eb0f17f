//! Subprocess spawning and merged output streaming.
//!
//! Provides [`run_command`], which spawns a [`ProcessSpec`] with stdout and
//! stderr sharing one pipe, forwards every line to an [`OutputSink`] as it
//! arrives, scans for the embedded token, and returns the exit code.

use std::os::fd::OwnedFd;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::Command;

use super::executor::{OutputSink, ProcessError, ProcessSpec};
use crate::token;

/// Maximum bytes kept from a single output line.
///
/// Longer lines are truncated to prevent memory exhaustion from scripts
/// that emit huge unterminated blobs.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Spawn `spec`, stream its merged output into `sink`, and return its exit code.
///
/// The child's stdout and stderr are both the write end of a single pipe, so
/// lines reach the sink in the order the process wrote them. The first line
/// matching the token marker is offered to the sink; later matches are
/// ignored.
///
/// A process killed by a signal reports exit code `-1`.
pub async fn run_command(spec: &ProcessSpec, sink: &dyn OutputSink) -> Result<i32, ProcessError> {
    let (reader, writer) = std::io::pipe().map_err(ProcessError::IoError)?;
    let stderr_writer = writer.try_clone().map_err(ProcessError::IoError)?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer)
        // The child is killed when dropped (e.g. on timeout).
        .kill_on_drop(true);

    for (key, value) in &spec.env_vars {
        cmd.env(key, value);
    }

    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();

    let spawned = cmd.spawn();
    // The command owns our copies of the write end; the reader only sees EOF
    // once they are closed.
    drop(cmd);
    let mut child = spawned.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound(spec.program.clone()),
        std::io::ErrorKind::PermissionDenied => {
            ProcessError::PermissionDenied(spec.program.clone())
        }
        _ => ProcessError::IoError(e),
    })?;

    tracing::debug!(program = %spec.program, pid = ?child.id(), "Process spawned");

    let output =
        pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(ProcessError::IoError)?;

    let pump = async {
        stream_lines(output, sink).await;
        child.wait().await
    };

    let status = match spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, pump).await {
            Ok(result) => result,
            Err(_elapsed) => {
                // `child` is dropped on return, which kills the process.
                return Err(ProcessError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
        },
        None => pump.await,
    }
    .map_err(ProcessError::IoError)?;

    Ok(status.code().unwrap_or(-1))
}

/// Read `stream` line by line into `sink` until EOF.
///
/// Invalid UTF-8 is replaced rather than aborting the stream.
async fn stream_lines<R: AsyncRead + Unpin>(stream: R, sink: &dyn OutputSink) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut token_seen = false;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                buf.truncate(MAX_LINE_BYTES);
                let line = String::from_utf8_lossy(&buf).into_owned();

                let found = if token_seen {
                    None
                } else {
                    token::extract_token(&line).map(str::to_string)
                };
                sink.push_line(line).await;
                if let Some(found) = found {
                    token_seen = true;
                    sink.capture_token(found).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read process output");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::scripting::test_helpers::{write_temp_script, RecordingSink};

    fn bash(script: &tempfile::NamedTempFile) -> ProcessSpec {
        ProcessSpec::new("bash").arg(script.path().to_str().expect("path"))
    }

    #[tokio::test]
    async fn streams_lines_in_order() {
        let script = write_temp_script("echo one\necho two\necho three\n");
        let sink = RecordingSink::default();

        let code = run_command(&bash(&script), &sink).await.expect("run");

        assert_eq!(code, 0);
        assert_eq!(sink.lines().await, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn merges_stderr_into_output() {
        let script = write_temp_script("echo out\necho err >&2\n");
        let sink = RecordingSink::default();

        run_command(&bash(&script), &sink).await.expect("run");

        assert_eq!(sink.lines().await, vec!["out", "err"]);
    }

    const INTERLEAVED: &str = "for i in $(seq 1 300); do\n  echo out$i\n  echo err$i >&2\ndone\n";

    fn interleaved_lines() -> Vec<String> {
        (1..=300)
            .flat_map(|i| [format!("out{i}"), format!("err{i}")])
            .collect()
    }

    #[tokio::test]
    async fn interleaved_streams_keep_write_order() {
        let script = write_temp_script(INTERLEAVED);
        let sink = RecordingSink::default();

        run_command(&bash(&script), &sink).await.expect("run");

        assert_eq!(sink.lines().await, interleaved_lines());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_streams_keep_write_order_across_threads() {
        let script = write_temp_script(INTERLEAVED);
        let sink = RecordingSink::default();

        run_command(&bash(&script), &sink).await.expect("run");

        assert_eq!(sink.lines().await, interleaved_lines());
    }

    #[tokio::test]
    async fn first_token_wins() {
        let script = write_temp_script("echo DEPLOYMENT_ID=first\necho DEPLOYMENT_ID=second\n");
        let sink = RecordingSink::default();

        run_command(&bash(&script), &sink).await.expect("run");

        assert_eq!(sink.token().await.as_deref(), Some("first"));
        assert_eq!(sink.token_offers(), 1);
    }

    #[tokio::test]
    async fn passes_env_vars_and_working_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let script = write_temp_script("echo \"$INPUT_REGION\"\npwd\n");
        let spec = bash(&script)
            .envs(vec![("INPUT_REGION".to_string(), "eu-west-1".to_string())])
            .current_dir(dir.path());
        let sink = RecordingSink::default();

        run_command(&spec, &sink).await.expect("run");

        let lines = sink.lines().await;
        assert_eq!(lines[0], "eu-west-1");
        let expected = dir.path().canonicalize().expect("canonicalize");
        let reported = std::path::Path::new(&lines[1])
            .canonicalize()
            .expect("canonicalize pwd");
        assert_eq!(reported, expected);
    }

    #[tokio::test]
    async fn reports_nonzero_exit_code() {
        let script = write_temp_script("exit 42\n");
        let sink = RecordingSink::default();

        let code = run_command(&bash(&script), &sink).await.expect("run");
        assert_eq!(code, 42);
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let script = write_temp_script("echo started\nsleep 60\n");
        let spec = bash(&script).timeout(Duration::from_millis(300));
        let sink = RecordingSink::default();

        let result = run_command(&spec, &sink).await;

        assert_matches!(result, Err(ProcessError::Timeout { .. }));
        assert_eq!(sink.lines().await, vec!["started"]);
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let sink = RecordingSink::default();
        let result = run_command(&ProcessSpec::new("/nonexistent/opsdeck-tool"), &sink).await;
        assert_matches!(result, Err(ProcessError::NotFound(p)) if p == "/nonexistent/opsdeck-tool");
    }
}
