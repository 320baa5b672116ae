//! Per-connection live log supervisor.
//!
//! A session walks `Idle -> Launching -> Streaming -> Draining -> Closed`.
//! While streaming, two pump tasks forward stdout and stderr lines to the
//! peer independently; the supervisor waits for the first of: peer
//! disconnect, registry kill, end of stdout, or a push failure. Draining
//! then stops the pumps, tears down the log process, and removes the
//! registry entry. Teardown runs on every path out of `Streaming`.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use dockscope_common::constants::UNRESOLVED_TARGET_MESSAGE;
use dockscope_common::diagnostics;
use dockscope_common::error::DockscopeError;
use dockscope_common::types::{
    ConnectionId, ConnectionInfo, ContainerId, OutputLine, SessionState, StreamSource,
};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::docker::LogCommand;
use crate::process::{self, LineReader, SubprocessHandle};
use crate::registry::ConnectionRegistry;

/// Outbound half of a peer connection. One message is one text frame.
pub type PeerSender = mpsc::Sender<String>;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The request named no usable container.
    Unresolved,
    /// The log process could not be started or registered.
    LaunchFailed,
    /// The log process closed its stdout.
    OutputEnded,
    /// Reading stdout failed.
    ReadFailed,
    /// The peer stopped accepting frames.
    PeerGone,
    /// The peer disconnected or a kill was requested through the registry.
    Disconnected,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Connection the session served.
    pub connection: ConnectionId,
    /// PID of the log process, if one was launched.
    pub pid: Option<u32>,
    /// Exit code of the log process, if it exited normally.
    pub exit_code: Option<i32>,
    /// Signal that terminated the log process, if one did.
    pub signal: Option<i32>,
    /// Why the session ended.
    pub end: EndReason,
    /// Every state the session passed through, in order.
    pub states: Vec<SessionState>,
}

impl SessionOutcome {
    /// Returns whether the session passed through `state`.
    #[must_use]
    pub fn reached(&self, state: SessionState) -> bool {
        self.states.contains(&state)
    }
}

/// How a pump task finished.
#[derive(Debug)]
enum PumpEnd {
    Eof,
    Stopped,
    PeerGone(DockscopeError),
    ReadFailed(DockscopeError),
}

/// Join handles of a connection's two pump tasks. A slot is emptied once
/// its task has been joined.
#[derive(Debug)]
struct Pumps {
    stdout: Option<JoinHandle<PumpEnd>>,
    stderr: Option<JoinHandle<PumpEnd>>,
}

/// Runs log sessions against a shared registry.
pub struct LogStreamSupervisor {
    registry: Arc<ConnectionRegistry>,
    commands: Arc<dyn LogCommand>,
    grace: Duration,
}

impl std::fmt::Debug for LogStreamSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStreamSupervisor")
            .field("program", &self.commands.program())
            .field("live_streams", &self.registry.len())
            .field("grace", &self.grace)
            .finish()
    }
}

impl LogStreamSupervisor {
    /// Creates a supervisor.
    ///
    /// `grace` bounds every wait during teardown: SIGTERM to SIGKILL, pump
    /// shutdown, and best-effort frames.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        commands: Arc<dyn LogCommand>,
        grace: Duration,
    ) -> Self {
        Self {
            registry,
            commands,
            grace,
        }
    }

    /// Registry the supervisor records live streams in.
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Runs one session to completion.
    ///
    /// `target` is `None` when the request named no usable container; the
    /// peer then receives one error frame and nothing is launched.
    /// `disconnect` is cancelled by the transport when the peer goes away.
    /// The peer channel closes once this returns and the pumps are gone.
    pub async fn run(
        &self,
        connection: ConnectionId,
        target: Option<ContainerId>,
        peer: PeerSender,
        disconnect: CancellationToken,
    ) -> SessionOutcome {
        let mut session = Session::new(connection);

        let Some(container) = target else {
            tracing::warn!(connection = %connection, "request names no usable container");
            self.push_best_effort(&peer, UNRESOLVED_TARGET_MESSAGE.to_owned())
                .await;
            return session.close(EndReason::Unresolved);
        };
        if disconnect.is_cancelled() {
            return session.close(EndReason::Disconnected);
        }

        session.transition(SessionState::Launching);
        let command = self.commands.follow(&container);
        tracing::info!(connection = %connection, container = %container, cmd = ?command, "starting log process");

        let mut process = match process::launch(&command) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(connection = %connection, container = %container, error = %e, "log process failed to start");
                self.push_best_effort(&peer, format!("failed to start log process: {}", e.peer_message()))
                    .await;
                return session.close(EndReason::LaunchFailed);
            }
        };
        session.pid = process.pid();

        let info = ConnectionInfo::new(connection, container);
        let kill = match self.registry.register(info, process.pid(), command) {
            Ok(kill) => kill,
            Err(e) => {
                tracing::error!(connection = %connection, error = %e, "log stream rejected");
                if let Err(kill_err) = process.force_kill().await {
                    tracing::warn!(connection = %connection, error = %kill_err, "failed to kill rejected log process");
                }
                self.push_best_effort(&peer, e.peer_message()).await;
                return session.close(EndReason::LaunchFailed);
            }
        };
        let _registration = Registration {
            registry: &self.registry,
            connection,
        };

        if disconnect.is_cancelled() {
            // The peer left while the process was starting.
            session.transition(SessionState::Draining);
            kill.cancel();
            self.record_kill(connection, &mut session, &mut process).await;
            let _ = self.registry.unregister(&connection);
            return session.close(EndReason::Disconnected);
        }

        session.transition(SessionState::Streaming);
        let mut pumps = Pumps {
            stdout: Some(self.spawn_pump(connection, &kill, &peer, process.take_stdout())),
            stderr: Some(self.spawn_pump(connection, &kill, &peer, process.take_stderr())),
        };
        let end = self
            .watch(connection, &kill, &disconnect, &peer, &mut pumps)
            .await;

        session.transition(SessionState::Draining);
        tracing::debug!(connection = %connection, ?end, "draining log session");

        if matches!(end, EndReason::OutputEnded | EndReason::ReadFailed) {
            // The process went away on its own: let stderr deliver its last
            // diagnostics, then reap and report an abnormal exit.
            if let Some(task) = pumps.stderr.take() {
                self.join_or_abort(connection, task).await;
            }
            let (status, natural) = self.reap(connection, &mut process).await;
            session.record(status);
            if natural {
                if let Some(report) = status.and_then(abnormal_exit_report) {
                    if self.registry.is_live(&connection) {
                        self.push_best_effort(&peer, report).await;
                    }
                }
            }
            kill.cancel();
        } else {
            kill.cancel();
            self.record_kill(connection, &mut session, &mut process).await;
        }

        for task in [pumps.stdout, pumps.stderr].into_iter().flatten() {
            self.join_or_abort(connection, task).await;
        }
        let _ = self.registry.unregister(&connection);
        session.close(end)
    }

    /// Waits for the first event that ends streaming.
    ///
    /// A stderr pump that ends, even by a read failure, only empties its
    /// slot; stdout keeps streaming.
    async fn watch(
        &self,
        connection: ConnectionId,
        kill: &CancellationToken,
        disconnect: &CancellationToken,
        peer: &PeerSender,
        pumps: &mut Pumps,
    ) -> EndReason {
        loop {
            tokio::select! {
                () = disconnect.cancelled() => return EndReason::Disconnected,
                () = kill.cancelled() => return EndReason::Disconnected,
                () = peer.closed() => return EndReason::PeerGone,
                result = join_pump(&mut pumps.stdout), if pumps.stdout.is_some() => {
                    pumps.stdout = None;
                    return self.stdout_finished(connection, peer, result).await;
                }
                result = join_pump(&mut pumps.stderr), if pumps.stderr.is_some() => {
                    pumps.stderr = None;
                    match result {
                        PumpEnd::PeerGone(e) => {
                            tracing::debug!(connection = %connection, error = %e, "stderr pump lost the peer");
                            return EndReason::PeerGone;
                        }
                        PumpEnd::ReadFailed(e) => {
                            tracing::warn!(connection = %connection, error = %e, "stderr pump failed");
                        }
                        PumpEnd::Eof | PumpEnd::Stopped => {}
                    }
                }
            }
        }
    }

    async fn record_kill(
        &self,
        connection: ConnectionId,
        session: &mut Session,
        process: &mut SubprocessHandle,
    ) {
        match process.force_kill().await {
            Ok(status) => session.record(status),
            Err(e) => {
                tracing::error!(connection = %connection, error = %e, "failed to kill log process");
            }
        }
    }

    fn spawn_pump<R>(
        &self,
        connection: ConnectionId,
        kill: &CancellationToken,
        peer: &PeerSender,
        reader: Option<LineReader<R>>,
    ) -> JoinHandle<PumpEnd>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pump = Pump {
            connection,
            registry: Arc::clone(&self.registry),
            kill: kill.clone(),
            peer: peer.clone(),
        };
        tokio::spawn(async move {
            match reader {
                Some(reader) => pump.run(reader).await,
                None => PumpEnd::Eof,
            }
        })
    }

    async fn stdout_finished(
        &self,
        connection: ConnectionId,
        peer: &PeerSender,
        result: PumpEnd,
    ) -> EndReason {
        match result {
            PumpEnd::Eof => {
                tracing::info!(connection = %connection, "log process closed stdout");
                EndReason::OutputEnded
            }
            PumpEnd::Stopped => EndReason::Disconnected,
            PumpEnd::PeerGone(e) => {
                tracing::debug!(connection = %connection, error = %e, "stdout pump lost the peer");
                EndReason::PeerGone
            }
            PumpEnd::ReadFailed(e) => {
                tracing::error!(connection = %connection, error = %e, "reading log output failed");
                if self.registry.is_live(&connection) {
                    self.push_best_effort(peer, format!("log stream read failed: {}", e.peer_message()))
                        .await;
                }
                EndReason::ReadFailed
            }
        }
    }

    /// Reaps a process whose stdout ended.
    ///
    /// Returns its status and whether it exited by itself; a process that
    /// outlives the grace period is terminated and its status is ours.
    async fn reap(
        &self,
        connection: ConnectionId,
        process: &mut SubprocessHandle,
    ) -> (Option<ExitStatus>, bool) {
        match process.wait_for_exit(self.grace).await {
            Ok(Some(status)) => {
                tracing::info!(connection = %connection, pid = ?process.pid(), %status, "log process ended");
                return (Some(status), true);
            }
            Ok(None) => {
                tracing::info!(connection = %connection, pid = ?process.pid(), "log process outlived its output, stopping it");
            }
            Err(e) => {
                tracing::warn!(connection = %connection, error = %e, "failed to wait for log process");
            }
        }
        match process.terminate(self.grace).await {
            Ok(status) => (status, false),
            Err(e) => {
                tracing::error!(connection = %connection, error = %e, "failed to stop log process");
                (None, false)
            }
        }
    }

    async fn join_or_abort(&self, connection: ConnectionId, mut task: JoinHandle<PumpEnd>) {
        if tokio::time::timeout(self.grace, &mut task).await.is_err() {
            tracing::warn!(connection = %connection, "pump did not stop in time, aborting");
            task.abort();
        }
    }

    async fn push_best_effort(&self, peer: &PeerSender, message: String) {
        if tokio::time::timeout(self.grace, peer.send(message)).await.is_err() {
            tracing::debug!("peer did not accept frame in time");
        }
    }
}

/// Awaits a pump that is known to be present.
async fn join_pump(task: &mut Option<JoinHandle<PumpEnd>>) -> PumpEnd {
    let Some(handle) = task.as_mut() else {
        return PumpEnd::Stopped;
    };
    match handle.await {
        Ok(end) => end,
        Err(e) => {
            tracing::error!(error = %e, "pump task failed");
            PumpEnd::Stopped
        }
    }
}

/// Forwards one output stream to the peer.
struct Pump {
    connection: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    kill: CancellationToken,
    peer: PeerSender,
}

impl Pump {
    async fn run<R: AsyncRead + Unpin>(self, mut reader: LineReader<R>) -> PumpEnd {
        let source = reader.source();
        loop {
            let next = tokio::select! {
                biased;
                () = self.kill.cancelled() => return PumpEnd::Stopped,
                next = reader.next_line() => next,
            };
            let text = match next {
                Ok(Some(text)) => text,
                Ok(None) => return PumpEnd::Eof,
                Err(e) => return PumpEnd::ReadFailed(e),
            };

            // Output that arrives after the connection left the registry is dropped.
            if !self.registry.is_live(&self.connection) {
                return PumpEnd::Stopped;
            }
            let line = OutputLine {
                connection_id: self.connection,
                source,
                text,
            };
            tokio::select! {
                biased;
                () = self.kill.cancelled() => return PumpEnd::Stopped,
                sent = self.peer.send(frame_text(line)) => {
                    if sent.is_err() {
                        return PumpEnd::PeerGone(DockscopeError::Push {
                            connection: self.connection,
                        });
                    }
                }
            }
        }
    }
}

/// Renders a line as a peer frame. Stderr lines that look like permission
/// failures carry the remediation hint.
fn frame_text(line: OutputLine) -> String {
    match line.source {
        StreamSource::Stdout => line.text,
        StreamSource::Stderr => diagnostics::with_remediation_hint(line.text),
    }
}

/// Describes an exit the peer should hear about, or `None` for a clean one.
fn abnormal_exit_report(status: ExitStatus) -> Option<String> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(format!("log process exited with status {code}"));
    }
    Some(exit_signal(status).map_or_else(
        || "log process terminated abnormally".to_owned(),
        |signal| format!("log process terminated by signal {signal}"),
    ))
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
const fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Removes the registry entry when the session scope ends, however it ends.
struct Registration<'a> {
    registry: &'a ConnectionRegistry,
    connection: ConnectionId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let _ = self.registry.unregister(&self.connection);
    }
}

/// State tracking for one session.
struct Session {
    connection: ConnectionId,
    state: SessionState,
    states: Vec<SessionState>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    signal: Option<i32>,
}

impl Session {
    fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            state: SessionState::Idle,
            states: vec![SessionState::Idle],
            pid: None,
            exit_code: None,
            signal: None,
        }
    }

    fn record(&mut self, status: Option<ExitStatus>) {
        if let Some(status) = status {
            self.exit_code = status.code();
            self.signal = exit_signal(status);
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(connection = %self.connection, from = %self.state, to = %next, "session transition");
        self.state = next;
        self.states.push(next);
    }

    fn close(mut self, end: EndReason) -> SessionOutcome {
        self.transition(SessionState::Closed);
        tracing::info!(connection = %self.connection, ?end, pid = ?self.pid, exit_code = ?self.exit_code, signal = ?self.signal, "log session closed");
        SessionOutcome {
            connection: self.connection,
            pid: self.pid,
            exit_code: self.exit_code,
            signal: self.signal,
            end,
            states: self.states,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadBuf};

    use super::*;

    /// Reader whose every read fails.
    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe torn down")))
        }
    }

    struct NoCommands;

    impl LogCommand for NoCommands {
        fn program(&self) -> &str {
            "true"
        }

        fn follow(&self, _container: &ContainerId) -> Vec<String> {
            vec!["true".into()]
        }

        fn history(&self, _container: &ContainerId, _lines: u32) -> Vec<String> {
            vec!["true".into()]
        }
    }

    struct Fixture {
        supervisor: LogStreamSupervisor,
        connection: ConnectionId,
        kill: CancellationToken,
        disconnect: CancellationToken,
        peer: PeerSender,
        frames: mpsc::Receiver<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let supervisor = LogStreamSupervisor::new(
                Arc::clone(&registry),
                Arc::new(NoCommands),
                Duration::from_millis(200),
            );
            let info = ConnectionInfo::new(
                ConnectionId::generate(),
                ContainerId::parse("abc123").expect("valid id"),
            );
            let connection = info.id;
            let kill = registry.register(info, None, Vec::new()).expect("register");
            let (peer, frames) = mpsc::channel(16);
            Self {
                supervisor,
                connection,
                kill,
                disconnect: CancellationToken::new(),
                peer,
                frames,
            }
        }

        fn pump(&self) -> Pump {
            Pump {
                connection: self.connection,
                registry: Arc::clone(self.supervisor.registry()),
                kill: self.kill.clone(),
                peer: self.peer.clone(),
            }
        }

        fn spawn<R>(&self, reader: R, source: StreamSource) -> Option<JoinHandle<PumpEnd>>
        where
            R: AsyncRead + Unpin + Send + 'static,
        {
            Some(self.supervisor.spawn_pump(
                self.connection,
                &self.kill,
                &self.peer,
                Some(LineReader::new(reader, source)),
            ))
        }

        async fn watch(&self, pumps: &mut Pumps) -> EndReason {
            tokio::time::timeout(
                Duration::from_secs(5),
                self.supervisor
                    .watch(self.connection, &self.kill, &self.disconnect, &self.peer, pumps),
            )
            .await
            .expect("session should end")
        }
    }

    fn drain(mut frames: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            out.push(frame);
        }
        out
    }

    fn line(source: StreamSource, text: &str) -> OutputLine {
        OutputLine {
            connection_id: ConnectionId::generate(),
            source,
            text: text.into(),
        }
    }

    #[test]
    fn stdout_frames_are_verbatim() {
        assert_eq!(
            frame_text(line(StreamSource::Stdout, "permission denied in app log")),
            "permission denied in app log"
        );
    }

    #[test]
    fn stderr_permission_frames_carry_hint() {
        let frame = frame_text(line(
            StreamSource::Stderr,
            "Got permission denied while trying to connect to the Docker daemon socket",
        ));
        assert!(frame.ends_with(diagnostics::REMEDIATION_HINT));
    }

    #[test]
    fn session_records_transitions_in_order() {
        let mut session = Session::new(ConnectionId::generate());
        session.transition(SessionState::Launching);
        let outcome = session.close(EndReason::LaunchFailed);
        assert_eq!(
            outcome.states,
            [SessionState::Idle, SessionState::Launching, SessionState::Closed]
        );
        assert!(!outcome.reached(SessionState::Streaming));
    }

    #[tokio::test]
    async fn pump_reports_read_failure() {
        let fixture = Fixture::new();
        let end = fixture
            .pump()
            .run(LineReader::new(Broken, StreamSource::Stderr))
            .await;
        match end {
            PumpEnd::ReadFailed(DockscopeError::StreamRead { stream, .. }) => {
                assert_eq!(stream, StreamSource::Stderr);
            }
            other => panic!("unexpected pump end: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pump_reports_lost_peer_as_push_error() {
        let Fixture {
            supervisor,
            connection,
            kill,
            peer,
            frames,
            ..
        } = Fixture::new();
        drop(frames);
        let pump = Pump {
            connection,
            registry: Arc::clone(supervisor.registry()),
            kill,
            peer,
        };
        let end = pump
            .run(LineReader::new(&b"L1\n"[..], StreamSource::Stdout))
            .await;
        assert!(matches!(
            end,
            PumpEnd::PeerGone(DockscopeError::Push { connection: c }) if c == connection
        ));
    }

    #[tokio::test]
    async fn stderr_read_failure_leaves_stdout_streaming() {
        let fixture = Fixture::new();
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut pumps = Pumps {
            stdout: fixture.spawn(reader, StreamSource::Stdout),
            stderr: fixture.spawn(Broken, StreamSource::Stderr),
        };
        let feeder = tokio::spawn(async move {
            // Let the stderr failure land before stdout produces anything.
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.write_all(b"L1\nL2\n").await.expect("write");
        });

        let end = fixture.watch(&mut pumps).await;
        feeder.await.expect("feeder");

        assert_eq!(end, EndReason::OutputEnded);
        assert!(pumps.stderr.is_none());
        assert!(fixture.supervisor.registry().is_live(&fixture.connection));
        let Fixture { frames, .. } = fixture;
        assert_eq!(drain(frames), ["L1", "L2"]);
    }

    #[tokio::test]
    async fn stdout_read_failure_is_reported_then_drains() {
        let fixture = Fixture::new();
        let mut pumps = Pumps {
            stdout: fixture.spawn((&b"L1\n"[..]).chain(Broken), StreamSource::Stdout),
            stderr: fixture.spawn(tokio::io::empty(), StreamSource::Stderr),
        };

        let end = fixture.watch(&mut pumps).await;
        assert_eq!(end, EndReason::ReadFailed);
        assert!(pumps.stdout.is_none());

        let Fixture { frames, .. } = fixture;
        let frames = drain(frames);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], "L1");
        assert!(frames[1].starts_with("log stream read failed: "));
        assert!(frames[1].contains("pipe torn down"));
    }

    #[cfg(unix)]
    #[test]
    fn abnormal_exits_are_described() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(abnormal_exit_report(ExitStatus::from_raw(0)), None);
        assert_eq!(
            abnormal_exit_report(ExitStatus::from_raw(1 << 8)).as_deref(),
            Some("log process exited with status 1")
        );
        assert_eq!(
            abnormal_exit_report(ExitStatus::from_raw(9)).as_deref(),
            Some("log process terminated by signal 9")
        );
    }
}
