//! CLI command definitions and dispatch.

pub mod logs;
pub mod serve;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use dockscope_common::config::DashboardConfig;

/// dockscope — live Docker log streaming for the dashboard.
#[derive(Parser, Debug)]
#[command(name = "dockscope", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "DOCKSCOPE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Format of the process's own diagnostic logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP and WebSocket server.
    Serve(serve::ServeArgs),
    /// Print the recent log history of a container.
    Logs(logs::LogsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => serve::execute(args),
        Command::Logs(args) => logs::execute(args),
    }
}

/// Loads the configuration file if one was given, otherwise the defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<DashboardConfig> {
    match path {
        Some(path) => DashboardConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(DashboardConfig::default()),
    }
}
