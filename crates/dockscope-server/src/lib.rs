//! # dockscope-server
//!
//! HTTP surface of dockscope: the live log WebSocket endpoint, the log
//! history and stream-info endpoints, and a health probe. The `dockscope`
//! binary wraps this with configuration and shutdown handling.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod routes;
pub mod transport;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use dockscope_common::config::DashboardConfig;
use dockscope_common::constants::{
    HEALTH_PATH, LOG_HISTORY_PATH, LOG_STREAM_INFO_PATH, LOG_STREAM_PATH,
};
use dockscope_runtime::docker::LogCommand;
use dockscope_runtime::registry::ConnectionRegistry;
use dockscope_runtime::supervisor::LogStreamSupervisor;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration.
    pub config: Arc<DashboardConfig>,
    /// Runs live log sessions.
    pub supervisor: Arc<LogStreamSupervisor>,
    /// Builds the Docker commands for streams and history fetches.
    pub commands: Arc<dyn LogCommand>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires a fresh registry and supervisor around `commands`.
    pub fn new(config: DashboardConfig, commands: Arc<dyn LogCommand>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let supervisor = Arc::new(LogStreamSupervisor::new(
            registry,
            Arc::clone(&commands),
            config.terminate_grace(),
        ));
        Self {
            config: Arc::new(config),
            supervisor,
            commands,
        }
    }

    /// Registry of live streams.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.supervisor.registry()
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(LOG_STREAM_PATH, get(transport::log_stream))
        .route(LOG_HISTORY_PATH, get(routes::history))
        .route(LOG_STREAM_INFO_PATH, get(routes::stream_info))
        .route(HEALTH_PATH, get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` fires.
///
/// On shutdown every live stream is killed before the listener stops
/// accepting connections.
///
/// # Errors
///
/// Returns an error if accepting connections fails.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let registry = Arc::clone(state.registry());
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            let killed = registry.kill_all();
            tracing::info!(killed, "shutting down, live streams stopped");
        })
        .await
}
