//! Unified error types for the dockscope workspace.
//!
//! Every failure a log session can hit maps onto one variant here. Whether
//! a failure is permission related is a classification over the rendered
//! message (see [`crate::diagnostics`]); it never selects a variant.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ConnectionId, StreamSource};

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DockscopeError {
    /// The request did not name a usable target container.
    #[error("cannot resolve target identifier: {message}")]
    Resolution {
        /// Why the identifier could not be resolved.
        message: String,
    },

    /// A subprocess could not be started.
    #[error("failed to start {program}: {source}")]
    Launch {
        /// Executable that failed to start.
        program: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// Reading a subprocess output stream failed mid-stream.
    #[error("failed to read {stream}: {source}")]
    StreamRead {
        /// Stream that failed.
        stream: StreamSource,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The peer channel no longer accepts frames.
    #[error("peer of connection {connection} is gone")]
    Push {
        /// Connection whose peer went away.
        connection: ConnectionId,
    },

    /// A one-shot command exited unsuccessfully.
    #[error("command exited with status {exit_code}: {stderr}")]
    CommandFailed {
        /// Exit code, or `-1` if the process was killed by a signal.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// An operation did not finish within its time limit.
    #[error("{operation} timed out after {limit_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Limit that was exceeded, in milliseconds.
        limit_ms: u64,
    },

    /// A connection already owns a live log process.
    #[error("connection {connection} already has a live log process")]
    AlreadyRegistered {
        /// Connection that was registered twice.
        connection: ConnectionId,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An I/O operation on a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DockscopeError {
    /// Returns whether the rendered error looks like a permission failure.
    ///
    /// Advisory only; callers use it to decorate messages, never to branch.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        crate::diagnostics::is_permission_failure(&self.to_string())
    }

    /// Renders the error as a peer-facing message, adding the remediation
    /// hint when it classifies as a permission failure.
    #[must_use]
    pub fn peer_message(&self) -> String {
        crate::diagnostics::with_remediation_hint(self.to_string())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DockscopeError>;
