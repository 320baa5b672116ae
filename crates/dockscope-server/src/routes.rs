//! JSON endpoints: log history, stream discovery, and health.
//!
//! Failures are reported in the body as `{"error": ...}` with a 200
//! status, which is what the dashboard frontend expects.

use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;
use dockscope_common::constants::LOG_STREAM_PATH;
use dockscope_common::diagnostics::REMEDIATION_STEPS;
use dockscope_common::error::DockscopeError;
use dockscope_common::types::ContainerId;
use dockscope_runtime::docker::locate_program;
use dockscope_runtime::logs::{effective_lines, fetch_history};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;

/// Query of `GET /metrics/docker/logs`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Container to read.
    #[serde(rename = "containerId")]
    pub container_id: Option<String>,
    /// Number of trailing lines; defaults apply when absent or non-positive.
    pub lines: Option<i64>,
}

/// Query of `GET /metrics/docker/logs/stream`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamInfoQuery {
    /// Container the client wants to follow.
    #[serde(rename = "containerId")]
    pub container_id: Option<String>,
}

/// `GET /metrics/docker/logs?containerId=<id>&lines=<n>`
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Value> {
    let container = match ContainerId::parse(query.container_id.as_deref().unwrap_or_default()) {
        Ok(container) => container,
        Err(e) => return error_body(&e),
    };
    let lines = effective_lines(
        query.lines,
        state.config.history_default_lines,
        state.config.history_max_lines,
    );

    match fetch_history(
        state.commands.as_ref(),
        &container,
        lines,
        state.config.history_timeout(),
    )
    .await
    {
        Ok(logs) => Json(json!({
            "containerId": container.as_str(),
            "logs": logs,
        })),
        Err(e) => {
            tracing::warn!(container = %container, error = %e, "log history unavailable");
            error_body(&e)
        }
    }
}

/// `GET /metrics/docker/logs/stream?containerId=<id>`
///
/// Tells the client where to open the live stream.
pub async fn stream_info(Query(query): Query<StreamInfoQuery>) -> Json<Value> {
    match ContainerId::parse(query.container_id.as_deref().unwrap_or_default()) {
        Ok(container) => Json(json!({
            "wsEndpoint": LOG_STREAM_PATH,
            "containerId": container.as_str(),
            "message": format!("connect to {LOG_STREAM_PATH}?containerId={container} to follow this container's logs"),
        })),
        Err(e) => error_body(&e),
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "UP",
        "activeStreams": state.registry().len(),
        "dockerAvailable": locate_program(state.commands.program()).is_ok(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn error_body(error: &DockscopeError) -> Json<Value> {
    let mut body = json!({ "error": error.to_string() });
    if error.is_permission_denied() {
        body["solution"] = Value::from(REMEDIATION_STEPS);
    }
    Json(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_carry_solution() {
        let Json(body) = error_body(&DockscopeError::CommandFailed {
            exit_code: 1,
            stderr: "Got permission denied while trying to connect to the Docker daemon socket"
                .into(),
        });
        assert!(body["error"].as_str().unwrap().contains("permission denied"));
        assert_eq!(body["solution"], REMEDIATION_STEPS);
    }

    #[test]
    fn other_errors_have_no_solution() {
        let Json(body) = error_body(&DockscopeError::CommandFailed {
            exit_code: 1,
            stderr: "No such container: web".into(),
        });
        assert!(body.get("solution").is_none());
    }

    #[tokio::test]
    async fn stream_info_points_at_websocket_endpoint() {
        let Json(body) = stream_info(Query(StreamInfoQuery {
            container_id: Some(" web ".into()),
        }))
        .await;
        assert_eq!(body["wsEndpoint"], LOG_STREAM_PATH);
        assert_eq!(body["containerId"], "web");
    }

    #[tokio::test]
    async fn stream_info_without_container_is_an_error() {
        let Json(body) = stream_info(Query(StreamInfoQuery::default())).await;
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }
}
