//! End-to-end tests against a running server.
//!
//! The server is bound to an ephemeral port with `sh -c` fixtures in place
//! of the Docker CLI; clients connect over real sockets:
//! 1. Live WebSocket streams
//! 2. Disconnect cleanup
//! 3. History, stream-info, and health endpoints

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dockscope_common::config::DashboardConfig;
use dockscope_common::types::ContainerId;
use dockscope_runtime::docker::LogCommand;
use dockscope_server::AppState;
use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const DEADLINE: Duration = Duration::from_secs(10);

/// Runs `follow` for live streams and `history` for history fetches.
struct Script {
    follow: &'static str,
    history: &'static str,
}

impl LogCommand for Script {
    fn program(&self) -> &str {
        "sh"
    }

    fn follow(&self, _container: &ContainerId) -> Vec<String> {
        vec!["sh".into(), "-c".into(), self.follow.into()]
    }

    fn history(&self, _container: &ContainerId, lines: u32) -> Vec<String> {
        vec![
            "sh".into(),
            "-c".into(),
            self.history.into(),
            "history".into(),
            lines.to_string(),
        ]
    }
}

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start(follow: &'static str, history: &'static str) -> Self {
        let config = DashboardConfig {
            bind_addr: "127.0.0.1:0".into(),
            terminate_grace_ms: 500,
            ..DashboardConfig::default()
        };
        let state = AppState::new(config, Arc::new(Script { follow, history }));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = CancellationToken::new();

        let serve_state = state.clone();
        let serve_shutdown = shutdown.clone();
        let _server = tokio::spawn(async move {
            dockscope_server::serve(listener, serve_state, serve_shutdown)
                .await
                .expect("serve");
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/ws/docker/logs{query}", self.addr)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get_json(&self, path: &str) -> Value {
        reqwest::get(self.http_url(path))
            .await
            .expect("request")
            .json()
            .await
            .expect("json body")
    }

    async fn wait_for_no_streams(&self) {
        let registry = self.state.registry();
        tokio::time::timeout(DEADLINE, async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("streams should be cleaned up");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Reads text frames until the server closes the socket.
async fn read_to_close<S>(ws: &mut S) -> Vec<String>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut frames = Vec::new();
    loop {
        let next = tokio::time::timeout(DEADLINE, ws.next())
            .await
            .expect("server should close the stream");
        match next {
            Some(Ok(Message::Text(text))) => frames.push(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return frames,
            Some(Ok(_)) => {}
        }
    }
}

// ── Live Streams ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_delivers_lines_then_closes() {
    let server = TestServer::start("echo L1; echo L2; echo L3", "true").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("?containerId=abc123"))
        .await
        .expect("connect");

    let frames = read_to_close(&mut ws).await;
    assert_eq!(frames, ["L1", "L2", "L3"]);
    server.wait_for_no_streams().await;
}

#[tokio::test]
async fn missing_container_id_gets_one_error_frame() {
    let server = TestServer::start("echo never", "true").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("?tail=5"))
        .await
        .expect("connect");

    let frames = read_to_close(&mut ws).await;
    assert_eq!(frames, ["cannot resolve target identifier"]);
}

#[tokio::test]
async fn permission_failure_reaches_client_with_hint() {
    let server = TestServer::start(
        "echo 'Got permission denied while trying to connect to the Docker daemon socket' >&2; exit 1",
        "true",
    )
    .await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("?containerId=abc123"))
        .await
        .expect("connect");

    let frames = read_to_close(&mut ws).await;
    assert!(frames[0].contains("permission denied"));
    assert!(frames[0].contains("hint:"));
    assert_eq!(frames.last().map(String::as_str), Some("log process exited with status 1"));
}

// ── Disconnect Cleanup ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_close_stops_the_stream() {
    let server = TestServer::start("while true; do echo tick; sleep 0.05; done", "true").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("?containerId=abc123"))
        .await
        .expect("connect");

    let first = tokio::time::timeout(DEADLINE, ws.next())
        .await
        .expect("first frame")
        .expect("open stream")
        .expect("frame");
    assert_eq!(first, Message::Text("tick".into()));
    assert_eq!(server.state.registry().len(), 1);

    ws.close(None).await.expect("close");
    drop(ws);
    server.wait_for_no_streams().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_client_stops_the_stream() {
    let server = TestServer::start("while true; do echo tick; sleep 0.05; done", "true").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("?containerId=abc123"))
        .await
        .expect("connect");
    let _ = tokio::time::timeout(DEADLINE, ws.next()).await.expect("first frame");

    drop(ws);
    server.wait_for_no_streams().await;
}

// ── HTTP Endpoints ───────────────────────────────────────────────────

#[tokio::test]
async fn history_returns_container_logs() {
    let server = TestServer::start("true", "echo one; echo \"$1\"").await;

    let body = server
        .get_json("/metrics/docker/logs?containerId=web&lines=5000")
        .await;
    assert_eq!(body["containerId"], "web");
    assert_eq!(body["logs"], "one\n1000\n");
}

#[tokio::test]
async fn history_permission_failure_includes_solution() {
    let server = TestServer::start(
        "true",
        "echo 'permission denied while trying to connect' >&2; exit 1",
    )
    .await;

    let body = server.get_json("/metrics/docker/logs?containerId=web").await;
    assert!(body["error"].as_str().unwrap().contains("permission denied"));
    assert!(body["solution"].as_str().unwrap().contains("docker"));
}

#[tokio::test]
async fn history_without_container_is_an_error() {
    let server = TestServer::start("true", "true").await;
    let body = server.get_json("/metrics/docker/logs").await;
    assert!(body["error"].is_string());
    assert!(body.get("logs").is_none());
}

#[tokio::test]
async fn stream_info_names_websocket_endpoint() {
    let server = TestServer::start("true", "true").await;
    let body = server
        .get_json("/metrics/docker/logs/stream?containerId=web")
        .await;
    assert_eq!(body["wsEndpoint"], "/ws/docker/logs");
    assert_eq!(body["containerId"], "web");
}

#[tokio::test]
async fn health_reports_active_streams() {
    let server = TestServer::start("true", "true").await;
    let body = server.get_json("/health").await;
    assert_eq!(body["status"], "UP");
    assert_eq!(body["activeStreams"], 0);
    assert_eq!(body["dockerAvailable"], true);
    assert!(body["timestamp"].is_string());
}
