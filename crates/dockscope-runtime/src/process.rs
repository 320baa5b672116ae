//! External process runner.
//!
//! Spawns a command from an argument vector, never through a shell, with
//! piped stdout and stderr. Teardown sends SIGTERM and escalates to SIGKILL
//! once the grace period runs out.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use dockscope_common::constants::MAX_LINE_BYTES;
use dockscope_common::error::{DockscopeError, Result};
use dockscope_common::types::StreamSource;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Line-oriented reader over one subprocess output stream.
///
/// Lines are decoded lossily as UTF-8 and returned without their `\n` or
/// `\r\n` terminator. A line longer than the limit (default
/// [`MAX_LINE_BYTES`]) is returned in chunks of at most that many bytes, so
/// a stream that never writes a newline cannot grow the buffer unbounded.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    source: StreamSource,
    buf: Vec<u8>,
    max_line: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wraps a raw stream.
    pub fn new(reader: R, source: StreamSource) -> Self {
        Self {
            inner: BufReader::new(reader),
            source,
            buf: Vec::new(),
            max_line: MAX_LINE_BYTES,
        }
    }

    /// Sets the longest chunk returned as one line. Zero is treated as one.
    #[must_use]
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line.max(1);
        self
    }

    /// Stream this reader drains.
    pub const fn source(&self) -> StreamSource {
        self.source
    }

    /// Reads the next line, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`DockscopeError::StreamRead`] if the underlying read fails.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        while self.buf.len() < self.max_line {
            let source = self.source;
            let available = self
                .inner
                .fill_buf()
                .await
                .map_err(|e| DockscopeError::StreamRead { stream: source, source: e })?;
            if available.is_empty() {
                break;
            }
            let room = self.max_line - self.buf.len();
            let window = &available[..available.len().min(room)];
            if let Some(end) = window.iter().position(|b| *b == b'\n') {
                self.buf.extend_from_slice(&window[..=end]);
                self.inner.consume(end + 1);
                break;
            }
            let taken = window.len();
            self.buf.extend_from_slice(window);
            self.inner.consume(taken);
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            let _ = self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                let _ = self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Handle to one spawned subprocess.
///
/// The handle owns the child. Dropping it kills the process if it is still
/// running, so an abandoned handle never leaks a log process.
#[derive(Debug)]
pub struct SubprocessHandle {
    child: Child,
    pid: Option<u32>,
    command: Vec<String>,
    stdout: Option<LineReader<ChildStdout>>,
    stderr: Option<LineReader<ChildStderr>>,
    exit_status: Option<ExitStatus>,
}

/// Spawns `command` with piped stdout and stderr and a null stdin.
///
/// # Errors
///
/// Returns [`DockscopeError::Launch`] if the vector is empty or the
/// executable cannot be spawned.
pub fn launch(command: &[String]) -> Result<SubprocessHandle> {
    let Some((program, args)) = command.split_first() else {
        return Err(DockscopeError::Launch {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    let mut child = Command::new(program)
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

    let pid = child.id();
    let stdout = child
        .stdout
        .take()
        .map(|s| LineReader::new(s, StreamSource::Stdout));
    let stderr = child
        .stderr
        .take()
        .map(|s| LineReader::new(s, StreamSource::Stderr));
    tracing::debug!(?pid, cmd = ?command, "subprocess launched");

    Ok(SubprocessHandle {
        child,
        pid,
        command: command.to_vec(),
        stdout,
        stderr,
        exit_status: None,
    })
}

impl SubprocessHandle {
    /// OS process ID, if the process had not been reaped at spawn time.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Argument vector the process was started with.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Takes the stdout reader. Returns `None` on the second call.
    pub fn take_stdout(&mut self) -> Option<LineReader<ChildStdout>> {
        self.stdout.take()
    }

    /// Takes the stderr reader. Returns `None` on the second call.
    pub fn take_stderr(&mut self) -> Option<LineReader<ChildStderr>> {
        self.stderr.take()
    }

    /// Exit status, once the process has been observed to exit.
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Returns whether the process is still running, reaping it if not.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = ?self.pid, error = %e, "failed to poll subprocess");
                false
            }
        }
    }

    /// Waits up to `limit` for the process to exit by itself.
    ///
    /// Returns `None` if it is still running when `limit` elapses; nothing
    /// is signaled either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be reaped.
    pub async fn wait_for_exit(&mut self, limit: Duration) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        match tokio::time::timeout(limit, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(self.io_error(e)),
            Err(_) => Ok(None),
        }
    }

    /// Requests graceful termination, escalating to a forced kill after `grace`.
    ///
    /// Returns the exit status. Calling this on a process that already
    /// exited returns the recorded status without signaling anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed or reaped.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        if !self.is_alive() {
            return Ok(self.exit_status);
        }

        self.request_stop();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid = ?self.pid, %status, "subprocess exited after SIGTERM");
                self.exit_status = Some(status);
                return Ok(Some(status));
            }
            Ok(Err(e)) => {
                tracing::warn!(pid = ?self.pid, error = %e, "waiting for subprocess failed");
            }
            Err(_) => {
                tracing::info!(pid = ?self.pid, grace_ms = grace.as_millis(), "grace period elapsed");
            }
        }
        self.force_kill().await
    }

    /// Kills the process immediately and reaps it.
    ///
    /// Safe to call on a process that already exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be delivered or the
    /// process cannot be reaped.
    pub async fn force_kill(&mut self) -> Result<Option<ExitStatus>> {
        if !self.is_alive() {
            return Ok(self.exit_status);
        }
        self.child.kill().await.map_err(|e| self.io_error(e))?;
        let status = self.child.wait().await.map_err(|e| self.io_error(e))?;
        tracing::info!(pid = ?self.pid, %status, "subprocess killed");
        self.exit_status = Some(status);
        Ok(Some(status))
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "SIGTERM not delivered");
        } else {
            tracing::debug!(pid, "sent SIGTERM");
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(pid = ?self.pid, error = %e, "kill not delivered");
        }
    }

    fn io_error(&self, source: std::io::Error) -> DockscopeError {
        DockscopeError::Io {
            path: self.command.first().cloned().unwrap_or_default().into(),
            source,
        }
    }
}
