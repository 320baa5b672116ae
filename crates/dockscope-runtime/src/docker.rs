//! Docker CLI command construction.
//!
//! Log commands are built as argument vectors and handed to the process
//! runner directly, so container IDs are never interpolated into a shell.

use std::path::PathBuf;

use dockscope_common::config::DashboardConfig;
use dockscope_common::error::{DockscopeError, Result};
use dockscope_common::types::ContainerId;

/// Source of the argument vectors used to read container logs.
///
/// The server uses [`DockerCli`]; tests substitute fixtures that emit
/// scripted output.
pub trait LogCommand: Send + Sync {
    /// Executable every command starts with.
    fn program(&self) -> &str;

    /// Command that follows a container's log until killed.
    fn follow(&self, container: &ContainerId) -> Vec<String>;

    /// Command that prints the last `lines` lines of a container's log and exits.
    fn history(&self, container: &ContainerId, lines: u32) -> Vec<String>;
}

/// Builds `docker logs` invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCli {
    binary: String,
    follow_tail_lines: u32,
}

impl DockerCli {
    /// Creates a builder for the given Docker executable.
    #[must_use]
    pub fn new(binary: impl Into<String>, follow_tail_lines: u32) -> Self {
        Self {
            binary: binary.into(),
            follow_tail_lines,
        }
    }

    /// Creates a builder from the dashboard configuration.
    #[must_use]
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::new(config.docker_binary.clone(), config.follow_tail_lines)
    }

    /// Locates the Docker executable on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`DockscopeError::Config`] if the executable cannot be found.
    pub fn locate(&self) -> Result<PathBuf> {
        locate_program(&self.binary)
    }
}

impl LogCommand for DockerCli {
    fn program(&self) -> &str {
        &self.binary
    }

    fn follow(&self, container: &ContainerId) -> Vec<String> {
        vec![
            self.binary.clone(),
            "logs".into(),
            "-f".into(),
            "--tail".into(),
            self.follow_tail_lines.to_string(),
            container.as_str().to_owned(),
        ]
    }

    fn history(&self, container: &ContainerId, lines: u32) -> Vec<String> {
        vec![
            self.binary.clone(),
            "logs".into(),
            "--tail".into(),
            lines.to_string(),
            container.as_str().to_owned(),
        ]
    }
}

/// Resolves `program` on `PATH`, or checks it directly if it is a path.
///
/// # Errors
///
/// Returns [`DockscopeError::Config`] if the program cannot be found.
pub fn locate_program(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| DockscopeError::Config {
        message: format!("{program} not found (install the Docker CLI or set docker_binary)"),
    })
}
