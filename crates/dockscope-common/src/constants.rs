//! System-wide constants and defaults.

/// Application name used in CLI output and logs.
pub const APP_NAME: &str = "dockscope";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "dockscope";

/// Default address the dashboard server binds to.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// WebSocket path serving live container logs.
pub const LOG_STREAM_PATH: &str = "/ws/docker/logs";

/// HTTP path serving a one-shot tail of a container's logs.
pub const LOG_HISTORY_PATH: &str = "/metrics/docker/logs";

/// HTTP path describing where the live log stream can be opened.
pub const LOG_STREAM_INFO_PATH: &str = "/metrics/docker/logs/stream";

/// HTTP health probe path.
pub const HEALTH_PATH: &str = "/health";

/// Query parameter carrying the target container, matched case-sensitively.
pub const CONTAINER_ID_PARAM: &str = "containerId";

/// Executable invoked for every log command.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Lines of backlog replayed when a live stream opens.
pub const DEFAULT_FOLLOW_TAIL_LINES: u32 = 50;

/// Lines returned by a history fetch when the caller does not ask for a count.
pub const DEFAULT_HISTORY_LINES: u32 = 100;

/// Upper bound on lines returned by a history fetch.
pub const MAX_HISTORY_LINES: u32 = 1000;

/// Milliseconds a log process gets between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 2_000;

/// Milliseconds a history fetch may run before it is killed.
pub const DEFAULT_HISTORY_TIMEOUT_MS: u64 = 10_000;

/// Capacity of the per-connection outbound frame queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Longest log line forwarded as one frame. Longer lines are split.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Frame sent when the request does not name a usable container.
pub const UNRESOLVED_TARGET_MESSAGE: &str = "cannot resolve target identifier";
