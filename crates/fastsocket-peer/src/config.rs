use std::time::Duration;

use fastsocket_message::CodecConfig;
use serde::{Deserialize, Serialize};

/// Default time a request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default time allowed for the client's TCP connect plus WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default time the server allows an accepted socket to finish its handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default listen address for [`Server`](crate::Server).
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8765";
/// Default number of unsolicited messages queued per connection while
/// handlers are busy.
pub const DEFAULT_HANDLER_QUEUE_CAPACITY: usize = 1024;

/// What to do with an inbound message that neither fulfills a pending request
/// nor matches a registered handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledPolicy {
    /// Drop silently.
    Ignore,
    /// Drop with a warning log.
    #[default]
    Log,
    /// Report a [`DispatchError::Unhandled`](crate::DispatchError::Unhandled)
    /// to the error callback.
    Error,
}

/// Per-connection behavior shared by clients and servers.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Timeout used by `request` when the caller passes none. Default: 30s.
    pub default_timeout: Duration,
    /// Handling of unmatched inbound messages. Default: [`UnhandledPolicy::Log`].
    pub unhandled: UnhandledPolicy,
    /// Frame size limits applied in both directions.
    pub codec: CodecConfig,
    /// Unsolicited messages waiting for the handler worker. When full, new
    /// ones are dropped and reported; replies are unaffected. Default: 1024.
    pub handler_queue_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            unhandled: UnhandledPolicy::default(),
            codec: CodecConfig::default(),
            handler_queue_capacity: DEFAULT_HANDLER_QUEUE_CAPACITY,
        }
    }
}

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on connect plus handshake. Default: 10s.
    pub connect_timeout: Duration,
    pub peer: PeerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            peer: PeerConfig::default(),
        }
    }
}

/// Server listen and accept settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address passed to the TCP listener. Default: `127.0.0.1:8765`.
    pub bind_addr: String,
    /// Bound on each accepted socket's WebSocket handshake. Default: 5s.
    pub handshake_timeout: Duration,
    pub peer: PeerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            peer: PeerConfig::default(),
        }
    }
}
