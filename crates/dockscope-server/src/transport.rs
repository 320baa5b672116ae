//! WebSocket transport for live log streams.
//!
//! Each upgraded socket becomes one connection: a writer task forwards
//! supervisor frames as text messages, the inbound half is read only to
//! notice the peer leaving, and the supervisor runs the log session.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::response::IntoResponse;
use dockscope_common::constants::CONTAINER_ID_PARAM;
use dockscope_common::types::{ConnectionId, ContainerId};
use dockscope_runtime::registry::ConnectionRegistry;
use dockscope_runtime::supervisor::SessionOutcome;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::AppState;

/// Reads the container ID from a raw query string.
///
/// Parameters are split on `&`; the first one starting with the literal,
/// case-sensitive `containerId=` supplies the value. Missing, empty, or
/// invalid values yield `None`. Values are not percent-decoded.
pub fn extract_container_id(query: Option<&str>) -> Option<ContainerId> {
    let value = query?.split('&').find_map(|param| {
        param
            .strip_prefix(CONTAINER_ID_PARAM)
            .and_then(|rest| rest.strip_prefix('='))
    })?;
    ContainerId::parse(value).ok()
}

/// `GET /ws/docker/logs?containerId=<id>`
pub async fn log_stream(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let target = extract_container_id(query.as_deref());
    ws.on_upgrade(move |socket| serve_connection(socket, state, target))
}

async fn serve_connection(socket: WebSocket, state: AppState, target: Option<ContainerId>) {
    let connection = ConnectionId::generate();
    tracing::info!(
        connection = %connection,
        container = target.as_ref().map_or("-", ContainerId::as_str),
        "log stream connected"
    );

    let (sink, stream) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel(state.config.outbound_buffer);
    let disconnect = CancellationToken::new();
    let grace = state.config.terminate_grace();

    let writer = tokio::spawn(write_frames(sink, frames_rx, connection));
    let supervisor = Arc::clone(&state.supervisor);
    let token = disconnect.clone();
    let mut session = tokio::spawn(async move {
        supervisor
            .run(connection, target, frames_tx, token)
            .await
    });

    let outcome = tokio::select! {
        () = read_until_closed(stream, connection) => {
            close(state.registry(), &connection, &disconnect);
            finish(&mut session, connection, grace * 4).await
        }
        joined = &mut session => joined.map_err(|e| {
            tracing::error!(connection = %connection, error = %e, "log session task failed");
        }).ok(),
    };

    // The writer sends the close frame once the supervisor drops its sender.
    if tokio::time::timeout(grace, writer).await.is_err() {
        tracing::debug!(connection = %connection, "socket writer did not finish in time");
    }
    tracing::info!(
        connection = %connection,
        end = ?outcome.as_ref().map(|o| o.end),
        "log stream disconnected"
    );
}

/// Stops whatever the connection still has running. Safe for connections
/// that never registered a process.
fn close(registry: &ConnectionRegistry, connection: &ConnectionId, disconnect: &CancellationToken) {
    let _ = registry.force_kill_if_live(connection);
    let _ = registry.unregister(connection);
    disconnect.cancel();
}

async fn finish(
    session: &mut JoinHandle<SessionOutcome>,
    connection: ConnectionId,
    limit: Duration,
) -> Option<SessionOutcome> {
    match tokio::time::timeout(limit, &mut *session).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            tracing::error!(connection = %connection, error = %e, "log session task failed");
            None
        }
        Err(_) => {
            tracing::warn!(connection = %connection, "log session did not stop in time, aborting");
            session.abort();
            None
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<String>,
    connection: ConnectionId,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(Message::Text(frame.into())).await {
            tracing::debug!(connection = %connection, error = %e, "socket send failed");
            return;
        }
    }
    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!(connection = %connection, error = %e, "socket close failed");
    }
}

async fn read_until_closed(mut stream: SplitStream<WebSocket>, connection: ConnectionId) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => {
                tracing::debug!(connection = %connection, "peer closed socket");
                return;
            }
            // Inbound data frames are ignored.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection = %connection, error = %e, "socket read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted(query: &str) -> Option<String> {
        extract_container_id(Some(query)).map(|id| id.as_str().to_owned())
    }

    #[test]
    fn container_id_is_read_from_query() {
        assert_eq!(extracted("containerId=abc123").as_deref(), Some("abc123"));
    }

    #[test]
    fn first_matching_parameter_wins() {
        assert_eq!(
            extracted("tail=5&containerId=web&containerId=db").as_deref(),
            Some("web")
        );
    }

    #[test]
    fn missing_or_empty_value_yields_none() {
        assert!(extract_container_id(None).is_none());
        assert!(extracted("").is_none());
        assert!(extracted("tail=5").is_none());
        assert!(extracted("containerId=").is_none());
    }

    #[test]
    fn parameter_name_is_case_sensitive_and_exact() {
        assert!(extracted("containerid=abc").is_none());
        assert!(extracted("containerIdx=abc").is_none());
        assert!(extracted("xcontainerId=abc").is_none());
    }

    #[test]
    fn flag_like_values_are_rejected() {
        assert!(extracted("containerId=--help").is_none());
        assert!(extracted("containerId=a%20b").is_none());
    }

    #[test]
    fn container_names_with_separators_are_accepted() {
        assert_eq!(
            extracted("containerId=my_app.web-1").as_deref(),
            Some("my_app.web-1")
        );
    }
}
