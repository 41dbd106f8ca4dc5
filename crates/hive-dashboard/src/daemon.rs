//! Client side of the session daemon: blocking request/reply RPCs for worker
//! tasks and an async event subscription feeding the UI loop.

use chrono::Utc;
use hive_core::daemon_ipc::{
    encode_frame, read_frame, DaemonEventPayload, FocusPanePayload, FocusSessionPayload,
    FrameError, HelloPayload, NdjsonFrameDecoder, ProtocolVersion, SnapshotStatePayload,
    SubscribePayload, WireEnvelope, WireMsg, CURRENT_PROTOCOL_VERSION, DEFAULT_MAX_FRAME_BYTES,
};
use hive_core::{PaneViewRequest, PaneViewResponse, StateSnapshot};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon unavailable: {0}")]
    Unavailable(String),
    #[error("daemon call timed out after {0:?}")]
    Timeout(Duration),
    #[error("daemon io error: {0}")]
    Io(#[from] io::Error),
    #[error("daemon frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("daemon error {code}: {message}")]
    Remote { code: String, message: String },
    #[error("unexpected daemon reply: {0}")]
    UnexpectedReply(&'static str),
    #[error("pane view worker failed: {0}")]
    Worker(String),
}

impl DaemonError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DaemonError::Unavailable(_))
    }
}

/// RPCs the dashboard issues against the daemon. Calls block and are meant to
/// run on worker threads, never on the UI loop.
pub trait DaemonClient: Send + Sync {
    fn snapshot_state(&self, since_seq: u64) -> Result<StateSnapshot, DaemonError>;
    fn get_pane_view(&self, request: &PaneViewRequest) -> Result<PaneViewResponse, DaemonError>;
    fn focus_pane(&self, pane_id: &str) -> Result<(), DaemonError>;
    fn focus_session(&self, name: &str) -> Result<(), DaemonError>;
}

pub struct SocketClient {
    socket: PathBuf,
    client_id: String,
    timeout: Duration,
    next_request: AtomicU64,
}

impl SocketClient {
    pub fn new(socket: impl Into<PathBuf>, client_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            client_id: client_id.into(),
            timeout,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn envelope(&self, msg: WireMsg) -> WireEnvelope {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        WireEnvelope {
            version: ProtocolVersion(CURRENT_PROTOCOL_VERSION),
            sender_id: self.client_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            request_id: Some(format!("{}-{request_id}", self.client_id)),
            msg,
        }
    }

    #[cfg(unix)]
    fn call(&self, msg: WireMsg, timeout: Duration) -> Result<WireMsg, DaemonError> {
        use std::io::{BufReader, Write};
        use std::os::unix::net::UnixStream;

        let request = self.envelope(msg);
        let frame = encode_frame(&request, DEFAULT_MAX_FRAME_BYTES)?;
        let deadline = Instant::now() + timeout;
        let mut stream = UnixStream::connect(&self.socket).map_err(|err| connect_error(&self.socket, err))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.write_all(&frame).map_err(|err| io_error(err, timeout))?;
        stream.flush().map_err(|err| io_error(err, timeout))?;

        let mut reader = BufReader::new(stream);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DaemonError::Timeout(timeout));
            }
            reader.get_ref().set_read_timeout(Some(remaining))?;
            let reply: WireEnvelope = match read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES) {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    return Err(DaemonError::Unavailable(
                        "daemon closed the connection".to_string(),
                    ))
                }
                Err(FrameError::Read { kind, .. })
                    if matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Err(DaemonError::Timeout(timeout))
                }
                Err(err) => return Err(err.into()),
            };
            if reply.request_id != request.request_id {
                continue;
            }
            return match reply.msg {
                WireMsg::Error(payload) => Err(DaemonError::Remote {
                    code: payload.code,
                    message: payload.message,
                }),
                other => Ok(other),
            };
        }
    }

    #[cfg(not(unix))]
    fn call(&self, _msg: WireMsg, _timeout: Duration) -> Result<WireMsg, DaemonError> {
        Err(DaemonError::Unavailable(
            "unix sockets are not supported on this platform".to_string(),
        ))
    }
}

fn connect_error(socket: &Path, err: io::Error) -> DaemonError {
    match err.kind() {
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::PermissionDenied => {
            DaemonError::Unavailable(format!("{}: {err}", socket.display()))
        }
        _ => DaemonError::Io(err),
    }
}

fn io_error(err: io::Error, timeout: Duration) -> DaemonError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => DaemonError::Timeout(timeout),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            DaemonError::Unavailable(err.to_string())
        }
        _ => DaemonError::Io(err),
    }
}

impl DaemonClient for SocketClient {
    fn snapshot_state(&self, since_seq: u64) -> Result<StateSnapshot, DaemonError> {
        match self.call(
            WireMsg::SnapshotState(SnapshotStatePayload { since_seq }),
            self.timeout,
        )? {
            WireMsg::Snapshot(snapshot) => Ok(snapshot),
            other => Err(DaemonError::UnexpectedReply(other.kind())),
        }
    }

    fn get_pane_view(&self, request: &PaneViewRequest) -> Result<PaneViewResponse, DaemonError> {
        let timeout = Duration::from_millis(request.timeout_ms.max(1));
        match self.call(WireMsg::GetPaneView(request.clone()), timeout)? {
            WireMsg::PaneView(response) => Ok(response),
            other => Err(DaemonError::UnexpectedReply(other.kind())),
        }
    }

    fn focus_pane(&self, pane_id: &str) -> Result<(), DaemonError> {
        let msg = WireMsg::FocusPane(FocusPanePayload {
            pane_id: pane_id.to_string(),
        });
        match self.call(msg, self.timeout)? {
            WireMsg::Ack(_) => Ok(()),
            other => Err(DaemonError::UnexpectedReply(other.kind())),
        }
    }

    fn focus_session(&self, name: &str) -> Result<(), DaemonError> {
        let msg = WireMsg::FocusSession(FocusSessionPayload {
            name: name.to_string(),
        });
        match self.call(msg, self.timeout)? {
            WireMsg::Ack(_) => Ok(()),
            other => Err(DaemonError::UnexpectedReply(other.kind())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    Connected,
    Disconnected,
    PaneUpdated { pane_id: String },
    SessionChanged { session: Option<String> },
}

impl From<DaemonEventPayload> for DaemonEvent {
    fn from(payload: DaemonEventPayload) -> Self {
        match payload {
            DaemonEventPayload::PaneUpdated { pane_id, .. } => DaemonEvent::PaneUpdated { pane_id },
            DaemonEventPayload::SessionChanged { session } => DaemonEvent::SessionChanged { session },
        }
    }
}

pub fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}

fn hello(client_id: &str) -> WireEnvelope {
    WireEnvelope {
        version: ProtocolVersion(CURRENT_PROTOCOL_VERSION),
        sender_id: client_id.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        request_id: None,
        msg: WireMsg::Hello(HelloPayload {
            client_id: client_id.to_string(),
            role: "dashboard".to_string(),
            capabilities: vec!["snapshot".to_string(), "pane_view".to_string()],
        }),
    }
}

fn subscribe(client_id: &str) -> WireEnvelope {
    WireEnvelope {
        version: ProtocolVersion(CURRENT_PROTOCOL_VERSION),
        sender_id: client_id.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        request_id: None,
        msg: WireMsg::Subscribe(SubscribePayload {
            topics: vec!["pane_updated".to_string(), "session_changed".to_string()],
        }),
    }
}

#[cfg(unix)]
async fn send_envelope(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &WireEnvelope,
) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let frame = encode_frame(envelope, DEFAULT_MAX_FRAME_BYTES)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Keeps a subscription to daemon events open, reconnecting with backoff.
/// Returns once the receiving side of `tx` is gone.
#[cfg(unix)]
pub async fn event_loop(socket: PathBuf, client_id: String, tx: mpsc::Sender<DaemonEvent>) {
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::net::UnixStream;

    let mut backoff = Duration::from_secs(1);
    loop {
        let stream = match UnixStream::connect(&socket).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(event = "daemon_connect_error", socket = %socket.display(), error = %err);
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };

        let (reader_half, mut writer_half) = stream.into_split();
        if send_envelope(&mut writer_half, &hello(&client_id)).await.is_err()
            || send_envelope(&mut writer_half, &subscribe(&client_id))
                .await
                .is_err()
        {
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
            continue;
        }
        backoff = Duration::from_secs(1);
        info!(event = "daemon_connected", socket = %socket.display());
        if tx.send(DaemonEvent::Connected).await.is_err() {
            return;
        }

        let mut reader = BufReader::new(reader_half);
        let mut decoder = NdjsonFrameDecoder::<WireEnvelope>::new(DEFAULT_MAX_FRAME_BYTES);
        let mut read_buf = [0u8; 8192];
        loop {
            let read = match reader.read(&mut read_buf).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) => {
                    warn!(event = "daemon_read_error", error = %err);
                    break;
                }
            };
            let report = decoder.push_chunk(&read_buf[..read]);
            for err in report.errors {
                warn!(event = "daemon_decode_error", error = %err);
            }
            for envelope in report.frames {
                if envelope.version.0 > CURRENT_PROTOCOL_VERSION {
                    continue;
                }
                if let WireMsg::Event(payload) = envelope.msg {
                    if tx.send(payload.into()).await.is_err() {
                        return;
                    }
                }
            }
        }

        for err in decoder.finish().errors {
            warn!(event = "daemon_decode_error", error = %err);
        }
        info!(event = "daemon_disconnected", socket = %socket.display());
        if tx.send(DaemonEvent::Disconnected).await.is_err() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

#[cfg(not(unix))]
pub async fn event_loop(_socket: PathBuf, _client_id: String, tx: mpsc::Sender<DaemonEvent>) {
    let _ = tx.send(DaemonEvent::Disconnected).await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use hive_core::daemon_ipc::{AckPayload, ErrorPayload};
    use hive_core::{ColorProfile, PaneViewKey, ViewMode};
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixListener;

    /// Answers one connection per reply, echoing the request id.
    fn serve(listener: UnixListener, replies: Vec<WireMsg>) -> std::thread::JoinHandle<Vec<WireMsg>> {
        std::thread::spawn(move || {
            let mut seen = Vec::new();
            for reply in replies {
                let (stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                let mut line = String::new();
                reader.read_line(&mut line).expect("read request");
                let request: WireEnvelope = serde_json::from_str(&line).expect("decode request");
                seen.push(request.msg.clone());
                let mut writer = stream;
                let noise = WireEnvelope {
                    request_id: None,
                    msg: WireMsg::Event(DaemonEventPayload::SessionChanged { session: None }),
                    ..request.clone()
                };
                writer
                    .write_all(&encode_frame(&noise, DEFAULT_MAX_FRAME_BYTES).expect("encode"))
                    .expect("write noise");
                let envelope = WireEnvelope {
                    msg: reply,
                    ..request
                };
                writer
                    .write_all(&encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES).expect("encode"))
                    .expect("write reply");
            }
            seen
        })
    }

    fn key() -> PaneViewKey {
        PaneViewKey {
            pane_id: "p-1".to_string(),
            cols: 20,
            rows: 4,
            mode: ViewMode::Ansi,
            show_cursor: false,
            color_profile: ColorProfile::Mono,
        }
    }

    #[test]
    fn missing_socket_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = SocketClient::new(dir.path().join("none.sock"), "t", Duration::from_millis(200));
        let err = client.snapshot_state(0).expect_err("no daemon");
        assert!(err.is_unavailable(), "{err}");
    }

    #[test]
    fn rpc_round_trip_matches_request_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        let server = serve(
            listener,
            vec![
                WireMsg::PaneView(PaneViewResponse {
                    key: key(),
                    view: "hello".to_string(),
                    allow_motion: true,
                    update_seq: 3,
                }),
                WireMsg::Ack(AckPayload::default()),
                WireMsg::Error(ErrorPayload {
                    code: "not_found".to_string(),
                    message: "no such session".to_string(),
                }),
            ],
        );

        let client = SocketClient::new(&socket, "t", Duration::from_secs(2));
        let response = client
            .get_pane_view(&PaneViewRequest {
                key: key(),
                timeout_ms: 2000,
            })
            .expect("pane view");
        assert_eq!(response.view, "hello");
        assert!(response.allow_motion);
        client.focus_pane("p-1").expect("focus pane");
        match client.focus_session("ghost") {
            Err(DaemonError::Remote { code, .. }) => assert_eq!(code, "not_found"),
            other => panic!("unexpected result: {other:?}"),
        }

        let seen = server.join().expect("server thread");
        assert!(matches!(seen[0], WireMsg::GetPaneView(_)));
        assert!(matches!(seen[1], WireMsg::FocusPane(_)));
        assert!(matches!(seen[2], WireMsg::FocusSession(_)));
    }

    #[test]
    fn unrelated_frames_do_not_extend_the_call_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("chatty.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read request");
            let request: WireEnvelope = serde_json::from_str(&line).expect("decode request");
            let noise = WireEnvelope {
                request_id: Some("someone-else".to_string()),
                msg: WireMsg::Event(DaemonEventPayload::SessionChanged { session: None }),
                ..request
            };
            let frame = encode_frame(&noise, DEFAULT_MAX_FRAME_BYTES).expect("encode");
            let mut writer = stream;
            for _ in 0..40 {
                if writer.write_all(&frame).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        });

        let client = SocketClient::new(&socket, "t", Duration::from_millis(300));
        let started = Instant::now();
        let err = client.snapshot_state(0).expect_err("no matching reply");
        let elapsed = started.elapsed();
        assert!(matches!(err, DaemonError::Timeout(_)), "{err}");
        assert!(elapsed < Duration::from_millis(1000), "call took {elapsed:?}");
        server.join().expect("server thread");
    }

    #[test]
    fn backoff_doubles_up_to_ten_seconds() {
        assert_eq!(next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(8)), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn event_loop_forwards_daemon_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("events.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("hello");
            line.clear();
            reader.read_line(&mut line).expect("subscribe");
            let event = WireEnvelope {
                version: ProtocolVersion::CURRENT,
                sender_id: "hived".to_string(),
                timestamp: Utc::now().to_rfc3339(),
                request_id: None,
                msg: WireMsg::Event(DaemonEventPayload::PaneUpdated {
                    pane_id: "p-7".to_string(),
                    update_seq: 1,
                }),
            };
            let mut writer = stream;
            writer
                .write_all(&encode_frame(&event, DEFAULT_MAX_FRAME_BYTES).expect("encode"))
                .expect("write event");
        });

        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(event_loop(socket, "t".to_string(), tx));
        assert_eq!(rx.recv().await, Some(DaemonEvent::Connected));
        assert_eq!(
            rx.recv().await,
            Some(DaemonEvent::PaneUpdated {
                pane_id: "p-7".to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(DaemonEvent::Disconnected));
        handle.abort();
    }
}
