use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fastsocket_message::{Message, MessageId};
use fastsocket_transport::Transport;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{close_reason_of, Connection};
use crate::dispatcher::CloseReason;
use crate::error::{DispatchError, PeerError, Result};
use crate::registry::{Handler, HandlerRegistry};

/// Client side of a fastsocket connection.
///
/// Handlers may be registered before or after [`connect`](Self::connect);
/// they apply to whatever the server sends that is not a reply to one of
/// this client's requests.
pub struct Client {
    url: String,
    config: ClientConfig,
    registry: HandlerRegistry,
    next_message_id: AtomicU64,
    connection: Option<Connection>,
    read_loop: Option<JoinHandle<CloseReason>>,
}

impl Client {
    /// Create a client for `url` (e.g. `ws://127.0.0.1:8765`) with default config.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(url, ClientConfig::default())
    }

    /// Create a client with explicit config.
    pub fn with_config(url: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            url: url.into(),
            registry: HandlerRegistry::with_policy(config.peer.unhandled),
            config,
            next_message_id: AtomicU64::new(1),
            connection: None,
            read_loop: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Register a handler for messages tagged `kind`. Returns `true` if it
    /// replaced an earlier one.
    pub fn on<H: Handler>(&self, kind: impl Into<String>, handler: H) -> bool {
        self.registry.register(kind, handler)
    }

    /// Replace the callback that receives handler and decode failures.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        self.registry.on_error(callback);
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Open the WebSocket connection and start reading.
    ///
    /// An existing connection is closed first.
    pub async fn connect(&mut self) -> Result<()> {
        let transport =
            fastsocket_transport::connect_with_timeout(&self.url, self.config.connect_timeout)
                .await?;
        self.attach(transport).await;
        info!(url = %self.url, "connected to server");
        Ok(())
    }

    /// Run the client over an already established transport.
    pub async fn attach(&mut self, transport: Transport) {
        if self.connection.is_some() {
            self.disconnect().await;
        }
        let (connection, read_loop) =
            Connection::open(transport, self.registry.clone(), &self.config.peer);
        self.connection = Some(connection);
        self.read_loop = Some(read_loop);
    }

    /// Close the connection and wait for its read loop to finish.
    ///
    /// Returns `None` if the client was not connected.
    pub async fn disconnect(&mut self) -> Option<CloseReason> {
        let connection = self.connection.take()?;
        connection.close();
        let reason = match self.read_loop.take() {
            Some(read_loop) => close_reason_of(read_loop.await),
            None => CloseReason::Requested,
        };
        debug!(url = %self.url, ?reason, "disconnected from server");
        Some(reason)
    }

    /// True while the connection's read loop is running.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.is_closed())
    }

    /// The live connection.
    pub fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(PeerError::NotConnected)
    }

    /// Next value of this client's message id counter.
    ///
    /// The counter survives reconnects.
    pub fn next_id(&self) -> MessageId {
        MessageId::from(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Build a message with a fresh id.
    pub fn message(&self, kind: impl Into<String>, data: serde_json::Value) -> Message {
        Message::new(self.next_id(), kind, data)
    }

    /// Send without waiting for a reply.
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.connection()?.send(message).await
    }

    /// Send and wait for the correlated reply; `Ok(None)` on timeout.
    pub async fn request(
        &self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        self.connection()?.request(message, timeout).await
    }

    /// [`request`](Self::request) when `blocking`, otherwise [`send`](Self::send).
    pub async fn send_msg(
        &self,
        message: &Message,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        self.connection()?.send_msg(message, blocking, timeout).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(connection) = &self.connection {
            connection.close();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish()
    }
}
