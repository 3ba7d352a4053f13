// src/system/executor.rs

use crate::CancellationToken;
use crate::models::ToolOutput;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, Command as StdCommand, Stdio};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const READER_GRACE: Duration = Duration::from_secs(2);
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Command '{0}' could not be executed: {1}")]
    Spawn(String, std::io::Error),
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

fn is_cancelled(token: &CancellationToken) -> bool {
    token.load(Ordering::SeqCst)
}

/// Builds the process for `command_line`: through the platform shell when
/// `shell` is set, otherwise split shell-style and spawned directly.
fn build_command(command_line: &str, shell: bool) -> Result<StdCommand, ExecutionError> {
    if shell {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = StdCommand::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = StdCommand::new("sh");
            c.arg("-c");
            c
        };
        command.arg(command_line);
        return Ok(command);
    }

    let parts = shlex::split(command_line)
        .ok_or_else(|| ExecutionError::CommandParse(command_line.to_string()))?;
    let (program, args) = parts.split_first().ok_or(ExecutionError::EmptyCommand)?;
    let mut command = StdCommand::new(program);
    command.args(args);
    Ok(command)
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut reader) = source {
            let _ = reader.read_to_end(&mut buffer);
        }
        buffer
    })
}

/// Invalid UTF-8 is replaced rather than rejected; the exit code alone
/// decides success.
fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Joins the reader threads of a killed child. A grandchild that inherited
/// the pipes can keep them open, so readers still running after
/// `READER_GRACE` are left to finish on their own.
fn join_readers(readers: [JoinHandle<Vec<u8>>; 2]) {
    let deadline = Instant::now() + READER_GRACE;
    while readers.iter().any(|r| !r.is_finished()) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    for reader in readers {
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            log::debug!("Output reader still blocked after kill; detaching it");
        }
    }
}

fn spawn(
    command_line: &str,
    shell: bool,
    cwd: &Path,
    env_vars: &BTreeMap<String, String>,
) -> Result<Child, ExecutionError> {
    let clean_cwd = dunce::simplified(cwd);
    let mut command = build_command(command_line, shell)?;
    command
        .current_dir(clean_cwd)
        .envs(env_vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match command.spawn() {
        Ok(child) => Ok(child),
        // Built-ins like `echo` only exist inside cmd on Windows.
        Err(e) if e.kind() == ErrorKind::NotFound && !shell && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", command_line);
            build_command(command_line, true)?
                .current_dir(clean_cwd)
                .envs(env_vars)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| ExecutionError::Spawn(command_line.to_string(), e))
        }
        Err(e) => Err(ExecutionError::Spawn(command_line.to_string(), e)),
    }
}

/// Runs `command_line` to completion, capturing stdout and stderr.
///
/// A non-zero exit is reported through [`ToolOutput::exit_code`], not as an
/// error. The child is killed if `cancellation_token` is raised while it
/// runs.
pub fn execute_and_capture(
    command_line: &str,
    shell: bool,
    cwd: &Path,
    env_vars: &BTreeMap<String, String>,
    cancellation_token: &CancellationToken,
) -> Result<ToolOutput, ExecutionError> {
    if is_cancelled(cancellation_token) {
        return Err(ExecutionError::Cancelled);
    }
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Err(ExecutionError::EmptyCommand);
    }

    log::debug!("Executing '{}' in {}", trimmed, cwd.display());
    let mut child = spawn(trimmed, shell, cwd, env_vars)?;
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    // Non-blocking wait loop to allow for cancellation.
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if is_cancelled(cancellation_token) {
                    log::debug!(
                        "Cancellation requested, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    join_readers([stdout, stderr]);
                    return Err(ExecutionError::Cancelled);
                }
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(ExecutionError::Spawn(trimmed.to_string(), e)),
        }
    };

    let output = ToolOutput {
        // Killed by a signal: no code, treat as failure.
        exit_code: status.code().unwrap_or(-1),
        stdout: collect(stdout),
        stderr: collect(stderr),
    };
    log::trace!("'{}' exited with {}", trimmed, output.exit_code);
    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let output = execute_and_capture(
            "echo hello; echo oops >&2; exit 3",
            true,
            dir.path(),
            &BTreeMap::new(),
            &token(),
        )
        .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, 3);
    }

    #[test]
    fn test_split_mode_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::from([("KILN_TEST_VALUE".to_string(), "42".to_string())]);
        let output = execute_and_capture(
            "sh -c 'printf %s \"$KILN_TEST_VALUE\"'",
            false,
            dir.path(),
            &env,
            &token(),
        )
        .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "42");
    }

    #[test]
    fn test_non_utf8_output_does_not_fail_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let output = execute_and_capture(
            "printf 'ok\\377' 1>&2; printf 'a\\376b'; exit 0",
            true,
            dir.path(),
            &BTreeMap::new(),
            &token(),
        )
        .unwrap();
        assert!(output.success());
        assert_eq!(output.stderr, "ok\u{FFFD}");
        assert_eq!(output.stdout, "a\u{FFFD}b");
    }

    #[test]
    fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let output =
            execute_and_capture("ls", true, dir.path(), &BTreeMap::new(), &token()).unwrap();
        assert!(output.stdout.contains("marker.txt"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let cancelled = Arc::new(AtomicBool::new(true));
        let result = execute_and_capture("true", true, dir.path(), &BTreeMap::new(), &cancelled);
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    }

    #[test]
    fn test_cancellation_kills_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = token();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.store(true, Ordering::SeqCst);
        });

        let started = std::time::Instant::now();
        let result = execute_and_capture("sleep 10", false, dir.path(), &BTreeMap::new(), &cancel);
        handle.join().unwrap();

        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancellation_with_grandchild_holding_pipes() {
        // --- Setup: the background `sleep` inherits stdout and outlives `sh` ---
        let dir = tempfile::tempdir().unwrap();
        let cancel = token();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.store(true, Ordering::SeqCst);
        });

        // --- Execute ---
        let started = std::time::Instant::now();
        let result =
            execute_and_capture("sleep 10 & wait", true, dir.path(), &BTreeMap::new(), &cancel);
        handle.join().unwrap();

        // --- Assert: the readers are given up on after the grace period ---
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        assert!(started.elapsed() < READER_GRACE + Duration::from_secs(3));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = execute_and_capture(
            "definitely-not-a-real-program-kiln",
            false,
            dir.path(),
            &BTreeMap::new(),
            &token(),
        );
        assert!(matches!(result, Err(ExecutionError::Spawn(..))));
    }

    #[test]
    fn test_unbalanced_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let result = execute_and_capture("echo 'oops", false, dir.path(), &BTreeMap::new(), &token());
        assert!(matches!(result, Err(ExecutionError::CommandParse(_))));
    }
}
