//! `dockscope logs` — Print a container's recent log history.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use dockscope_common::diagnostics::REMEDIATION_STEPS;
use dockscope_common::types::ContainerId;
use dockscope_runtime::docker::DockerCli;
use dockscope_runtime::logs::{effective_lines, fetch_history};

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID or name.
    pub container: String,

    /// Number of trailing lines to print.
    #[arg(short = 'n', long)]
    pub lines: Option<i64>,

    /// Path to a JSON configuration file.
    #[arg(long, env = "DOCKSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Docker executable used to read logs.
    #[arg(long, env = "DOCKSCOPE_DOCKER")]
    pub docker: Option<String>,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container ID is invalid or Docker cannot
/// produce the logs.
pub fn execute(args: LogsArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(docker) = args.docker {
        config.docker_binary = docker;
    }
    let container = ContainerId::parse(&args.container)?;
    let lines = effective_lines(
        args.lines,
        config.history_default_lines,
        config.history_max_lines,
    );

    let cli = DockerCli::from_config(&config);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let logs = match runtime.block_on(fetch_history(&cli, &container, lines, config.history_timeout())) {
        Ok(logs) => logs,
        Err(e) => {
            if e.is_permission_denied() {
                eprintln!("{REMEDIATION_STEPS}");
            }
            return Err(e).with_context(|| format!("failed to read logs of {container}"));
        }
    };

    if logs.is_empty() {
        println!("No logs available for container: {container}");
    } else {
        print!("{logs}");
    }

    Ok(())
}
