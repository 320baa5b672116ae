//! One-shot command execution with captured output.

use std::process::Stdio;
use std::time::Duration;

use dockscope_common::error::{DockscopeError, Result};
use tokio::process::Command;

/// Output from a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command, `-1` if it was killed by a signal.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `command` to completion, capturing stdout and stderr concurrently.
///
/// The child is killed if it outlives `limit`.
///
/// # Errors
///
/// Returns [`DockscopeError::Launch`] if the command is empty or cannot be
/// spawned, [`DockscopeError::Timeout`] if it runs longer than `limit`, or
/// [`DockscopeError::Io`] if its output cannot be collected.
pub async fn run_to_completion(command: &[String], limit: Duration) -> Result<ExecOutput> {
    let Some((program, args)) = command.split_first() else {
        return Err(DockscopeError::Launch {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };
    tracing::debug!(cmd = ?command, "running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DockscopeError::Launch {
            program: program.clone(),
            source: e,
        })?;

    // Dropping the pending future on timeout drops the child, which kills it.
    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| DockscopeError::Timeout {
            operation: format!("`{}`", command.join(" ")),
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
        .map_err(|e| DockscopeError::Io {
            path: program.into(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    tracing::debug!(exit_code, "command finished");

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code,
    })
}
