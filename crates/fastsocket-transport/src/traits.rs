use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Sink, Stream};

use crate::error::{Result, TransportError};

/// Write half of a transport: accepts whole frames.
pub type FrameSink = Pin<Box<dyn Sink<Bytes, Error = TransportError> + Send>>;

/// Read half of a transport: yields whole inbound frames until the peer closes.
///
/// A `None` item means the connection ended cleanly. An `Err` item is a read
/// failure; callers treat it as fatal for the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An established, message-oriented connection.
///
/// This is the fundamental type returned by transport operations. Framing,
/// handshake and TLS all live below it; everything above it only sees whole
/// byte frames.
pub struct Transport {
    sink: FrameSink,
    stream: FrameStream,
    info: TransportInfo,
}

/// Descriptive metadata about an established transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportInfo {
    /// Remote peer description (socket address or in-memory label).
    pub peer: String,
    /// Request path the client connected on, without the leading `/`.
    /// Only populated on the accepting side.
    pub path: Option<String>,
}

impl Transport {
    /// Assemble a transport from an arbitrary sink/stream pair.
    pub fn from_parts(sink: FrameSink, stream: FrameStream, info: TransportInfo) -> Self {
        Self { sink, stream, info }
    }

    /// Connection metadata.
    pub fn info(&self) -> &TransportInfo {
        &self.info
    }

    /// Split into independently owned write and read halves.
    pub fn split(self) -> (FrameSink, FrameStream, TransportInfo) {
        (self.sink, self.stream, self.info)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.info.peer)
            .field("path", &self.info.path)
            .finish()
    }
}
