use fastsocket_message::{DecodeError, MessageId};

/// Errors surfaced to callers of connection and peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] fastsocket_transport::TransportError),

    /// Message encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] fastsocket_message::CodecError),

    /// A request with this correlation id is already waiting for its reply.
    #[error("correlation id {0} is already pending on this connection")]
    DuplicateId(MessageId),

    /// The connection closed before the operation completed.
    #[error("connection closed: {0}")]
    Closed(String),

    /// No connection has been established yet.
    #[error("not connected")]
    NotConnected,
}

/// Boxed error returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Failures caught at the dispatch boundary.
///
/// None of these stop the read loop; they are handed to the registry's error
/// callback and processing continues with the next frame.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// An inbound frame could not be decoded and was dropped.
    #[error("dropped inbound frame: {0}")]
    Decode(#[from] DecodeError),

    /// A handler returned an error.
    #[error("handler for '{kind}' failed on message {id}: {source}")]
    Handler {
        kind: String,
        id: MessageId,
        source: HandlerError,
    },

    /// A handler panicked.
    #[error("handler for '{kind}' panicked on message {id}: {message}")]
    Panicked {
        kind: String,
        id: MessageId,
        message: String,
    },

    /// No handler matched and the unhandled policy is `error`.
    #[error("no handler registered for '{kind}' (message {id})")]
    Unhandled { kind: String, id: MessageId },

    /// The connection's handler queue was full; the message was dropped.
    #[error("handler queue full ({capacity} messages); dropped '{kind}' message {id}")]
    QueueFull {
        kind: String,
        id: MessageId,
        capacity: usize,
    },
}

pub type Result<T> = std::result::Result<T, PeerError>;
