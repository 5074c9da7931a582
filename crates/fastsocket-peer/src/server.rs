use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fastsocket_message::Message;
use fastsocket_transport::{PendingUpgrade, WsListener};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{close_reason_of, Connection};
use crate::error::{DispatchError, Result};
use crate::registry::{Handler, HandlerRegistry};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// WebSocket server that dispatches inbound messages by type tag.
///
/// Every accepted connection gets its own read loop; handlers are shared
/// across connections and receive the [`Connection`] the message came in on.
pub struct Server {
    config: ServerConfig,
    registry: HandlerRegistry,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a server with default config.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server with explicit config.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            registry: HandlerRegistry::with_policy(config.peer.unhandled),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a handler for messages tagged `kind`. Returns `true` if it
    /// replaced an earlier one.
    pub fn on_message<H: Handler>(&self, kind: impl Into<String>, handler: H) -> bool {
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

    /// Bind `config.bind_addr` and start accepting connections.
    pub async fn start(self) -> Result<ServerHandle> {
        let listener = WsListener::bind(&self.config.bind_addr).await?;
        Ok(self.start_with_listener(listener))
    }

    /// Start accepting connections on an already bound listener.
    pub fn start_with_listener(self, listener: WsListener) -> ServerHandle {
        let local_addr = listener.local_addr();
        let shared = Arc::new(ServerShared {
            config: self.config,
            registry: self.registry,
            connections: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });
        info!(
            addr = %local_addr,
            transport = listener.transport_name(),
            "server listening"
        );

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        ServerHandle {
            shared,
            local_addr,
            accept_task: Some(accept_task),
        }
    }
}

struct ServerShared {
    config: ServerConfig,
    registry: HandlerRegistry,
    connections: Mutex<HashMap<u64, Connection>>,
    shutdown: CancellationToken,
}

impl ServerShared {
    fn connections(&self) -> MutexGuard<'_, HashMap<u64, Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self.connections().values().cloned().collect();
        connections.sort_by_key(Connection::id);
        connections
    }
}

async fn accept_loop(listener: WsListener, shared: Arc<ServerShared>) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(pending) => {
                tokio::spawn(serve_connection(pending, Arc::clone(&shared)));
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!(addr = %listener.local_addr(), "accept loop stopped");
}

async fn serve_connection(pending: PendingUpgrade, shared: Arc<ServerShared>) {
    let peer = pending.peer_addr();
    let transport = match pending.upgrade(shared.config.handshake_timeout).await {
        Ok(transport) => transport,
        Err(err) => {
            warn!(%peer, error = %err, "websocket handshake failed");
            return;
        }
    };

    let (connection, read_loop) =
        Connection::open(transport, shared.registry.clone(), &shared.config.peer);
    {
        // Checked under the map lock so `stop` either sees this entry or we
        // see its cancellation.
        let mut connections = shared.connections();
        if shared.shutdown.is_cancelled() {
            connection.close();
        } else {
            connections.insert(connection.id(), connection.clone());
        }
    }
    info!(
        connection = connection.id(),
        %peer,
        path = connection.path().unwrap_or(""),
        "client connected"
    );

    let reason = close_reason_of(read_loop.await);
    shared.connections().remove(&connection.id());
    info!(connection = connection.id(), %peer, ?reason, "client disconnected");
}

/// Running server. Dropping the handle stops accepting and closes every
/// connection without waiting; [`stop`](Self::stop) also waits.
pub struct ServerHandle {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    accept_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL clients can connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Handlers remain registrable while the server runs.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    /// Live connections, oldest first.
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections().len()
    }

    /// Live connections whose request path is `path` (without leading `/`).
    pub fn connections_on(&self, path: &str) -> Vec<Connection> {
        self.shared
            .snapshot()
            .into_iter()
            .filter(|connection| connection.path() == Some(path))
            .collect()
    }

    /// Send `message` to every live connection.
    ///
    /// Returns how many connections accepted the write; failures are logged.
    pub async fn broadcast(&self, message: &Message) -> usize {
        deliver(self.shared.snapshot(), message).await
    }

    /// Send `message` to the connections opened on `path`.
    ///
    /// Returns how many connections accepted the write.
    pub async fn send_to(&self, path: &str, message: &Message) -> usize {
        let targets = self.connections_on(path);
        if targets.is_empty() {
            warn!(path, "no connection on path; message not sent");
            return 0;
        }
        deliver(targets, message).await
    }

    /// Stop accepting, close every connection and wait for their read loops.
    pub async fn stop(mut self) {
        self.shared.shutdown.cancel();
        if let Some(accept_task) = self.accept_task.take() {
            let _ = accept_task.await;
        }

        let connections = self.shared.snapshot();
        for connection in &connections {
            connection.close();
        }
        for connection in &connections {
            connection.closed().await;
        }
        info!(
            addr = %self.local_addr,
            closed = connections.len(),
            "server stopped"
        );
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        for connection in self.shared.snapshot() {
            connection.close();
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connection_count())
            .finish()
    }
}

async fn deliver(targets: Vec<Connection>, message: &Message) -> usize {
    let mut delivered = 0;
    for connection in targets {
        match connection.send(message).await {
            Ok(()) => delivered += 1,
            Err(err) => {
                warn!(connection = connection.id(), error = %err, "delivery failed");
            }
        }
    }
    delivered
}
