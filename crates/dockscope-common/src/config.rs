//! Global configuration model for the dockscope server.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DockscopeError, Result};

/// Root configuration for the dashboard server.
///
/// Every field has a default, so a config file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Socket address the HTTP server binds to.
    pub bind_addr: String,
    /// Docker CLI executable used for every log command.
    pub docker_binary: String,
    /// Lines of backlog replayed when a live stream opens.
    pub follow_tail_lines: u32,
    /// Lines returned by a history fetch when none are requested.
    pub history_default_lines: u32,
    /// Upper bound on lines returned by a history fetch.
    pub history_max_lines: u32,
    /// Grace period between SIGTERM and SIGKILL, in milliseconds.
    pub terminate_grace_ms: u64,
    /// Time limit for a history fetch, in milliseconds.
    pub history_timeout_ms: u64,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_buffer: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_addr: constants::DEFAULT_BIND_ADDR.to_owned(),
            docker_binary: constants::DEFAULT_DOCKER_BINARY.to_owned(),
            follow_tail_lines: constants::DEFAULT_FOLLOW_TAIL_LINES,
            history_default_lines: constants::DEFAULT_HISTORY_LINES,
            history_max_lines: constants::MAX_HISTORY_LINES,
            terminate_grace_ms: constants::DEFAULT_TERMINATE_GRACE_MS,
            history_timeout_ms: constants::DEFAULT_HISTORY_TIMEOUT_MS,
            outbound_buffer: constants::DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl DashboardConfig {
    /// Loads a configuration from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// holds invalid values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| DockscopeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`DockscopeError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(DockscopeError::Config { message });

        if self.bind_addr.parse::<SocketAddr>().is_err() {
            return invalid(format!("bind_addr is not a socket address: {}", self.bind_addr));
        }
        if self.docker_binary.trim().is_empty() {
            return invalid("docker_binary must not be empty".into());
        }
        if self.history_max_lines == 0 {
            return invalid("history_max_lines must be positive".into());
        }
        if self.history_default_lines == 0 || self.history_default_lines > self.history_max_lines
        {
            return invalid(format!(
                "history_default_lines must be within 1..={}",
                self.history_max_lines
            ));
        }
        if self.terminate_grace_ms == 0 {
            return invalid("terminate_grace_ms must be positive".into());
        }
        if self.history_timeout_ms == 0 {
            return invalid("history_timeout_ms must be positive".into());
        }
        if self.outbound_buffer == 0 {
            return invalid("outbound_buffer must be positive".into());
        }
        Ok(())
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub const fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Time limit for a history fetch.
    #[must_use]
    pub const fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }
}
