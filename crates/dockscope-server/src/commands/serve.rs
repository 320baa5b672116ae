//! `dockscope serve` — Run the log streaming server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use dockscope_common::config::DashboardConfig;
use dockscope_runtime::docker::{DockerCli, LogCommand, locate_program};
use dockscope_server::AppState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Arguments for the `serve` command.
///
/// Flags override values from the configuration file.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to a JSON configuration file.
    #[arg(long, env = "DOCKSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "DOCKSCOPE_BIND")]
    pub bind: Option<String>,

    /// Docker executable used to read logs.
    #[arg(long, env = "DOCKSCOPE_DOCKER")]
    pub docker: Option<String>,

    /// Lines of backlog sent when a live stream opens.
    #[arg(long, env = "DOCKSCOPE_TAIL")]
    pub tail: Option<u32>,

    /// Milliseconds a log process gets to exit after SIGTERM.
    #[arg(long, env = "DOCKSCOPE_GRACE_MS")]
    pub grace_ms: Option<u64>,
}

impl ServeArgs {
    fn resolve_config(&self) -> anyhow::Result<DashboardConfig> {
        let mut config = super::load_config(self.config.as_deref())?;
        if let Some(bind) = &self.bind {
            config.bind_addr.clone_from(bind);
        }
        if let Some(docker) = &self.docker {
            config.docker_binary.clone_from(docker);
        }
        if let Some(tail) = self.tail {
            config.follow_tail_lines = tail;
        }
        if let Some(grace_ms) = self.grace_ms {
            config.terminate_grace_ms = grace_ms;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Executes the `serve` command.
///
/// Blocks until Ctrl+C, then stops every live stream.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the listener
/// cannot be bound.
pub fn execute(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.resolve_config()?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: DashboardConfig) -> anyhow::Result<()> {
    match locate_program(&config.docker_binary) {
        Ok(path) => tracing::info!(docker = %path.display(), "using docker executable"),
        Err(e) => tracing::warn!(error = %e, "docker executable not found, streams will fail to start"),
    }

    let commands: Arc<dyn LogCommand> = Arc::new(DockerCli::from_config(&config));
    let state = AppState::new(config, commands);
    let listener = TcpListener::bind(&state.config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", state.config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "dockscope listening");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    ctrlc::set_handler(move || trigger.cancel())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    dockscope_server::serve(listener, state, shutdown)
        .await
        .context("server error")?;
    tracing::info!("dockscope stopped");
    Ok(())
}
