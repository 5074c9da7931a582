//! Correlated JSON message envelope and codec.
//!
//! Every message travels as one transport frame holding a JSON object:
//! - `id`: correlation identifier (integer of any width, or string)
//! - `type`: routing tag
//! - `data`: key/value payload
//!
//! Decoding never panics: a bad frame becomes a [`DecodeError`] that keeps
//! the raw bytes for logging.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{
    decode_message, encode_message, CodecConfig, MessageCodec, DEFAULT_MAX_FRAME_SIZE,
};
pub use error::{CodecError, DecodeError, DecodeReason, InvalidMessageId, Result};
pub use message::{Message, MessageId};
