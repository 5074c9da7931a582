use std::net::SocketAddr;
use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors that can occur in WebSocket transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified URL.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: tungstenite::Error,
    },

    /// Failed to accept an incoming TCP connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The WebSocket upgrade of an accepted connection failed.
    #[error("websocket handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        source: tungstenite::Error,
    },

    /// A connect or handshake did not finish in time.
    #[error("transport operation timed out after {0:?}")]
    Timeout(Duration),

    /// A WebSocket protocol error occurred on an established connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Kind of the underlying I/O failure, if there is one.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Bind { source, .. } | Self::Accept(source) | Self::Io(source) => {
                Some(source.kind())
            }
            Self::Connect {
                source: tungstenite::Error::Io(source),
                ..
            }
            | Self::Handshake {
                source: tungstenite::Error::Io(source),
                ..
            }
            | Self::WebSocket(tungstenite::Error::Io(source)) => Some(source.kind()),
            Self::Timeout(_) => Some(std::io::ErrorKind::TimedOut),
            _ => None,
        }
    }

    /// True when a connect failed because the URL itself was unusable.
    pub fn is_invalid_url(&self) -> bool {
        matches!(
            self,
            Self::Connect {
                source: tungstenite::Error::Url(_),
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
