use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{future, stream, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{FrameSink, FrameStream, Transport, TransportInfo};

/// WebSocket listening surface.
///
/// Accepting is split in two steps: [`WsListener::accept`] takes the next TCP
/// connection, and [`PendingUpgrade::upgrade`] runs the WebSocket handshake.
/// Servers run the second step on a per-connection task so a slow client
/// cannot stall the accept loop.
pub struct WsListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WsListener {
    /// Bind and listen on a TCP address (e.g. `127.0.0.1:8765`, port 0 for ephemeral).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening for websocket connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next TCP connection. The WebSocket upgrade is not performed yet.
    pub async fn accept(&self) -> Result<PendingUpgrade> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp connection");
        Ok(PendingUpgrade { stream, peer })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "websocket"
    }
}

/// An accepted TCP connection awaiting its WebSocket handshake.
#[derive(Debug)]
pub struct PendingUpgrade {
    stream: TcpStream,
    peer: SocketAddr,
}

impl PendingUpgrade {
    /// Remote address of the connecting client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Run the server side of the WebSocket handshake, bounded by `timeout`.
    ///
    /// The request path is captured into [`TransportInfo::path`].
    pub async fn upgrade(self, timeout: Duration) -> Result<Transport> {
        let peer = self.peer;
        let mut path = None;
        let capture_path = |request: &Request, response: Response| {
            path = Some(request.uri().path().trim_start_matches('/').to_string());
            Ok::<Response, ErrorResponse>(response)
        };

        let ws = tokio::time::timeout(
            timeout,
            tokio_tungstenite::accept_hdr_async(self.stream, capture_path),
        )
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(|source| TransportError::Handshake { peer, source })?;

        debug!(%peer, ?path, "websocket handshake complete");

        Ok(into_transport(
            ws,
            TransportInfo {
                peer: peer.to_string(),
                path,
            },
        ))
    }
}

/// Connect to a WebSocket server (`ws://host:port/path`).
pub async fn connect(url: &str) -> Result<Transport> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|source| TransportError::Connect {
            url: url.to_string(),
            source,
        })?;
    debug!(url, "connected to websocket server");
    Ok(into_transport(
        ws,
        TransportInfo {
            peer: url.to_string(),
            path: None,
        },
    ))
}

/// Connect to a WebSocket server, failing if the handshake exceeds `timeout`.
pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Transport> {
    tokio::time::timeout(timeout, connect(url))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

fn into_transport<S>(ws: WebSocketStream<S>, info: TransportInfo) -> Transport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws.split();

    let sink: FrameSink = Box::pin(
        write
            .sink_map_err(TransportError::from)
            .with(|frame: Bytes| future::ready(Ok::<_, TransportError>(to_ws_message(frame)))),
    );

    let stream: FrameStream = Box::pin(stream::unfold(read, |mut read| async move {
        loop {
            match read.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some((Ok(Bytes::copy_from_slice(text.as_bytes())), read));
                }
                Ok(WsMessage::Binary(data)) => return Some((Ok(data), read)),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "peer sent close frame");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(err) => return Some((Err(TransportError::WebSocket(err)), read)),
            }
        }
    }));

    Transport::from_parts(sink, stream, info)
}

/// JSON envelopes travel as text frames; anything that is not UTF-8 goes out as binary.
fn to_ws_message(frame: Bytes) -> WsMessage {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => WsMessage::text(text),
        Err(err) => WsMessage::binary(err.into_bytes()),
    }
}
