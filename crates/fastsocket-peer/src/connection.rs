use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fastsocket_message::{Message, MessageCodec, MessageId};
use fastsocket_transport::{FrameSink, Transport, TransportInfo};
use futures_util::SinkExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PeerConfig;
use crate::dispatcher::{CloseReason, Dispatcher, DispatcherState};
use crate::error::{PeerError, Result};
use crate::pending::{PendingRequestTable, ReplyOutcome};
use crate::registry::HandlerRegistry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Bound on flushing and closing the write half during teardown.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

struct ConnectionInner {
    id: u64,
    info: TransportInfo,
    sink: Mutex<FrameSink>,
    pending: PendingRequestTable,
    codec: MessageCodec,
    default_timeout: Duration,
    next_message_id: AtomicU64,
    shutdown: CancellationToken,
    state: watch::Sender<DispatcherState>,
}

/// Handle to one live WebSocket connection.
///
/// Clones share the connection. Writes from concurrent tasks are serialized
/// frame by frame; replies are matched to their requests by the connection's
/// read loop.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Take ownership of `transport` and start its read loop.
    ///
    /// Unsolicited inbound messages are dispatched through `registry`. The
    /// returned handle completes with the reason the read loop stopped.
    pub fn open(
        transport: Transport,
        registry: HandlerRegistry,
        config: &PeerConfig,
    ) -> (Connection, JoinHandle<CloseReason>) {
        let (sink, stream, info) = transport.split();
        let (state, _) = watch::channel(DispatcherState::Running);
        let connection = Connection {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                info,
                sink: Mutex::new(sink),
                pending: PendingRequestTable::new(),
                codec: MessageCodec::with_config(config.codec.clone()),
                default_timeout: config.default_timeout,
                next_message_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                state,
            }),
        };
        debug!(
            connection = connection.id(),
            peer = %connection.peer(),
            "connection opened"
        );

        let read_loop = Dispatcher::new(connection.clone(), stream, registry)
            .with_queue_capacity(config.handler_queue_capacity)
            .spawn();
        (connection, read_loop)
    }

    /// Process-unique connection number.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Remote peer description.
    pub fn peer(&self) -> &str {
        &self.inner.info.peer
    }

    /// Request path the client connected on (server side only).
    pub fn path(&self) -> Option<&str> {
        self.inner.info.path.as_deref()
    }

    pub fn info(&self) -> &TransportInfo {
        &self.inner.info
    }

    /// Next value of this connection's message id counter.
    pub fn next_id(&self) -> MessageId {
        MessageId::from(self.inner.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Requests on this connection still waiting for a reply.
    pub fn pending(&self) -> &PendingRequestTable {
        &self.inner.pending
    }

    /// Timeout applied by [`request`](Self::request) when none is given.
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Write one message without waiting for anything back.
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        let frame = self.inner.codec.encode(message)?;
        self.write_frame(frame).await
    }

    /// Write `message` and wait for the message carrying the same id.
    ///
    /// Returns `Ok(None)` if no reply arrives within `timeout` (or the
    /// connection's default timeout). A reply arriving later is treated as
    /// unsolicited. Fails with [`PeerError::DuplicateId`] if a request with
    /// the same id is already waiting, and with [`PeerError::Closed`] if the
    /// connection closes first.
    pub async fn request(
        &self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        self.ensure_open()?;
        let timeout = timeout.unwrap_or(self.inner.default_timeout);
        let frame = self.inner.codec.encode(message)?;

        // The slot must exist before the frame leaves, or a fast reply could
        // be dispatched as unsolicited. On a failed write it is dropped,
        // which unregisters it.
        let slot = self.inner.pending.register(message.id().clone())?;
        self.write_frame(frame).await?;

        match slot.wait(timeout).await {
            ReplyOutcome::Reply(reply) => Ok(Some(reply)),
            ReplyOutcome::TimedOut => {
                warn!(
                    connection = self.id(),
                    id = %message.id(),
                    kind = message.kind(),
                    ?timeout,
                    "timed out waiting for reply"
                );
                Ok(None)
            }
            ReplyOutcome::Cancelled(reason) => Err(PeerError::Closed(reason)),
        }
    }

    /// `request` when `blocking`, otherwise `send`.
    ///
    /// A non-blocking call always returns `Ok(None)`.
    pub async fn send_msg(
        &self,
        message: &Message,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        if blocking {
            self.request(message, timeout).await
        } else {
            self.send(message).await.map(|()| None)
        }
    }

    /// Ask the read loop to stop. Pending requests resolve as closed.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Wait until the read loop has finished tearing the connection down.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|state| *state == DispatcherState::Closed)
            .await;
    }

    pub fn state(&self) -> DispatcherState {
        *self.inner.state.borrow()
    }

    /// True once the connection started closing.
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled() || self.state() != DispatcherState::Running
    }

    pub(crate) fn codec(&self) -> &MessageCodec {
        &self.inner.codec
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub(crate) fn set_state(&self, state: DispatcherState) {
        self.inner.state.send_replace(state);
    }

    /// Flush and close the write half, bounded by [`SINK_CLOSE_TIMEOUT`].
    pub(crate) async fn close_sink(&self) {
        let close = async {
            let mut sink = self.inner.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(SINK_CLOSE_TIMEOUT, close).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(connection = self.id(), error = %err, "closing write half failed"),
            Err(_) => debug!(connection = self.id(), "timed out closing write half"),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PeerError::Closed("connection closed".to_string()));
        }
        Ok(())
    }

    async fn write_frame(&self, frame: Bytes) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        if let Err(err) = sink.send(frame).await {
            drop(sink);
            warn!(connection = self.id(), error = %err, "write failed; closing connection");
            self.close();
            return Err(err.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.info.peer)
            .field("path", &self.inner.info.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Flatten a joined read loop into its close reason.
pub(crate) fn close_reason_of(
    joined: std::result::Result<CloseReason, tokio::task::JoinError>,
) -> CloseReason {
    joined.unwrap_or_else(|err| CloseReason::Transport(format!("read loop aborted: {err}")))
}

#[cfg(test)]
mod tests {
    use fastsocket_message::{encode_message, CodecConfig, CodecError};
    use fastsocket_transport::memory;
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;

    fn open_pair(config: &PeerConfig) -> (Connection, JoinHandle<CloseReason>, Transport) {
        let (local, remote) = memory::pair();
        let (connection, read_loop) = Connection::open(local, HandlerRegistry::new(), config);
        (connection, read_loop, remote)
    }

    #[tokio::test]
    async fn request_resolves_with_correlated_reply() {
        let (connection, _read_loop, remote) = open_pair(&PeerConfig::default());
        let (mut remote_sink, mut remote_stream, _) = remote.split();

        let responder = tokio::spawn(async move {
            let frame = remote_stream
                .next()
                .await
                .expect("request frame should arrive")
                .expect("request frame should be readable");
            let request = MessageCodec::new().decode(frame).expect("request should decode");
            let reply = request.reply("PONG", json!({"data": "Hello from server!"}));
            remote_sink
                .send(encode_message(&reply).expect("reply should encode"))
                .await
                .expect("reply should send");
            remote_sink
        });

        let request = Message::new(2, "PING", json!({"data": "Hello"}));
        let reply = connection
            .request(&request, Some(Duration::from_secs(2)))
            .await
            .expect("request should succeed")
            .expect("reply should arrive before timeout");

        assert_eq!(reply.id(), &MessageId::from(2));
        assert_eq!(reply.kind(), "PONG");
        assert_eq!(reply.data(), &json!({"data": "Hello from server!"}));
        assert!(connection.pending().is_empty());
        let _sink = responder.await.expect("responder should finish");
    }

    #[tokio::test]
    async fn request_times_out_with_none() {
        let (connection, _read_loop, _remote) = open_pair(&PeerConfig::default());

        let request = Message::new(1, "PING", json!({}));
        let reply = connection
            .request(&request, Some(Duration::from_millis(20)))
            .await
            .expect("request should not error");
        assert!(reply.is_none());
        assert!(connection.pending().is_empty());
    }

    #[tokio::test]
    async fn default_timeout_comes_from_config() {
        let config = PeerConfig {
            default_timeout: Duration::from_millis(20),
            ..PeerConfig::default()
        };
        let (connection, _read_loop, _remote) = open_pair(&config);

        let reply = connection
            .request(&Message::new(1, "PING", json!({})), None)
            .await
            .expect("request should not error");
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn concurrent_request_with_same_id_fails_fast() {
        let (connection, _read_loop, _remote) = open_pair(&PeerConfig::default());
        let request = Message::new(7, "PING", json!({}));

        let first = {
            let connection = connection.clone();
            let request = request.clone();
            tokio::spawn(async move {
                connection
                    .request(&request, Some(Duration::from_millis(200)))
                    .await
            })
        };
        while connection.pending().is_empty() {
            tokio::task::yield_now().await;
        }

        let second = connection
            .request(&request, Some(Duration::from_millis(200)))
            .await;
        assert!(
            matches!(second, Err(PeerError::DuplicateId(ref id)) if *id == MessageId::from(7))
        );

        let first = first.await.expect("first request task should finish");
        assert!(matches!(first, Ok(None)));
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_before_registering() {
        let config = PeerConfig {
            codec: CodecConfig { max_frame_size: 16 },
            ..PeerConfig::default()
        };
        let (connection, _read_loop, _remote) = open_pair(&config);

        let result = connection
            .request(&Message::new(1, "PING", json!({"data": "far too long"})), None)
            .await;
        assert!(matches!(result, Err(PeerError::Codec(_))));
        assert!(connection.pending().is_empty());
    }

    #[tokio::test]
    async fn undecodable_message_is_refused_instead_of_sent() {
        let (connection, _read_loop, remote) = open_pair(&PeerConfig::default());
        let (_remote_sink, mut remote_stream, _) = remote.split();

        let text_payload = Message::new(1, "NOTE", json!("hello"));
        let result = connection.send(&text_payload).await;
        assert!(matches!(
            result,
            Err(PeerError::Codec(CodecError::PayloadNotObject("string")))
        ));

        let untagged = Message::new(2, "", json!({}));
        let result = connection.request(&untagged, Some(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(PeerError::Codec(CodecError::EmptyType))));
        assert!(connection.pending().is_empty());

        // The connection stays usable and nothing reached the peer before this.
        connection
            .send(&Message::new(3, "NOTE", json!({})))
            .await
            .expect("well-formed send should succeed");
        let frame = remote_stream
            .next()
            .await
            .expect("frame should arrive")
            .expect("frame should be readable");
        let sent = MessageCodec::new().decode(frame).expect("frame should decode");
        assert_eq!(sent.id(), &MessageId::from(3));
    }

    #[tokio::test]
    async fn send_msg_non_blocking_returns_none() {
        let (connection, _read_loop, remote) = open_pair(&PeerConfig::default());
        let (_remote_sink, mut remote_stream, _) = remote.split();

        let result = connection
            .send_msg(&Message::new(3, "NOTE", json!({})), false, None)
            .await
            .expect("send should succeed");
        assert!(result.is_none());

        let frame = remote_stream
            .next()
            .await
            .expect("frame should arrive")
            .expect("frame should be readable");
        let sent = MessageCodec::new().decode(frame).expect("frame should decode");
        assert_eq!(sent.kind(), "NOTE");
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (connection, read_loop, _remote) = open_pair(&PeerConfig::default());
        connection.close();
        assert_eq!(close_reason_of(read_loop.await), CloseReason::Requested);

        let result = connection.send(&Message::new(1, "PING", json!({}))).await;
        assert!(matches!(result, Err(PeerError::Closed(_))));
        assert_eq!(connection.state(), DispatcherState::Closed);
    }

    #[tokio::test]
    async fn next_id_counts_up_from_one() {
        let (connection, _read_loop, _remote) = open_pair(&PeerConfig::default());
        assert_eq!(connection.next_id(), MessageId::from(1));
        assert_eq!(connection.next_id(), MessageId::from(2));
    }
}
