use bytes::Bytes;

const PREVIEW_LIMIT: usize = 256;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The encoded message exceeds the configured maximum frame size.
    #[error("encoded message too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The message has an empty type tag, which no receiver would accept.
    #[error("message type tag is empty")]
    EmptyType,

    /// The message payload is not a key/value object.
    #[error("message data must be an object, got {0}")]
    PayloadNotObject(&'static str),

    /// An inbound frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// An inbound frame that could not be turned into a [`Message`](crate::Message).
///
/// Carries the raw frame so the read loop can log it and move on.
#[derive(Debug, thiserror::Error)]
#[error("undecodable frame ({} bytes): {reason}", .raw.len())]
pub struct DecodeError {
    /// The frame exactly as received.
    pub raw: Bytes,
    /// Why decoding failed.
    pub reason: DecodeReason,
}

impl DecodeError {
    pub(crate) fn new(raw: Bytes, reason: DecodeReason) -> Self {
        Self { raw, reason }
    }

    /// Lossy, length-limited rendering of the raw frame for log output.
    pub fn preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.raw);
        if text.chars().count() <= PREVIEW_LIMIT {
            return text.into_owned();
        }
        let mut out: String = text.chars().take(PREVIEW_LIMIT).collect();
        out.push_str("...");
        out
    }
}

/// Reasons an inbound frame is rejected.
#[derive(Debug, thiserror::Error)]
pub enum DecodeReason {
    /// The frame exceeds the configured maximum frame size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame is not valid JSON, or a field has the wrong type.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("envelope must be an object, got {0}")]
    EnvelopeNotObject(&'static str),

    /// The envelope has no (or an empty) `type` tag.
    #[error("missing type tag")]
    MissingType,

    /// The envelope has no `id`.
    #[error("missing correlation id")]
    MissingId,

    /// `id` or `type` holds a JSON value of the wrong kind.
    #[error("invalid {field}: got {found}")]
    InvalidField {
        field: &'static str,
        found: &'static str,
    },

    /// `data` is present but is not a key/value object.
    #[error("data must be an object, got {0}")]
    PayloadNotObject(&'static str),
}

/// A JSON value that cannot serve as a correlation id.
#[derive(Debug, thiserror::Error)]
#[error("correlation id must be an integer or a string, got {found}")]
pub struct InvalidMessageId {
    pub found: &'static str,
}

pub type Result<T> = std::result::Result<T, CodecError>;
