//! Domain primitive types used across the dockscope workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DockscopeError, Result};

/// Unique identifier for one client log-streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Generates a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier or name of a Docker container.
///
/// Restricted to Docker's own alphabet: an ASCII alphanumeric first
/// character followed by alphanumerics, `_`, `.` or `-`. A value accepted
/// here can never be mistaken for a command-line flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Parses a container identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`DockscopeError::Resolution`] if the value is empty or
    /// contains characters Docker does not allow in names or IDs.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim();
        let mut chars = id.chars();
        let Some(first) = chars.next() else {
            return Err(DockscopeError::Resolution {
                message: "container id is empty".into(),
            });
        };
        if !first.is_ascii_alphanumeric()
            || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(DockscopeError::Resolution {
                message: format!("invalid container id: {id}"),
            });
        }
        Ok(Self(id.to_owned()))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = DockscopeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContainerId> for String {
    fn from(value: ContainerId) -> Self {
        value.0
    }
}

/// Which output stream of a log process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    /// Standard output: the container's log lines.
    Stdout,
    /// Standard error: diagnostics from the log command itself.
    Stderr,
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of output read from a log process, bound for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Connection the line is delivered to.
    pub connection_id: ConnectionId,
    /// Stream the line was read from.
    pub source: StreamSource,
    /// Line text without its terminator.
    pub text: String,
}

/// Descriptor of an open client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Container whose logs are streamed.
    pub container_id: ContainerId,
    /// When the connection was accepted.
    pub opened_at: DateTime<Utc>,
}

impl ConnectionInfo {
    /// Creates a descriptor stamped with the current time.
    #[must_use]
    pub fn new(id: ConnectionId, container_id: ContainerId) -> Self {
        Self {
            id,
            container_id,
            opened_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a log streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Connection accepted, nothing launched yet.
    Idle,
    /// Log process is being started.
    Launching,
    /// Output pumps are forwarding lines to the peer.
    Streaming,
    /// Pumps are being stopped and the process torn down.
    Draining,
    /// Session finished; all resources released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Launching => write!(f, "launching"),
            Self::Streaming => write!(f, "streaming"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
