//! WebSocket transport abstraction.
//!
//! Provides a unified interface over message-oriented connections:
//! - WebSocket over TCP (`ws://`), client and server side
//! - In-memory pairs for tests and embedding
//!
//! This is the lowest layer of fastsocket. Everything else builds on top of
//! the [`Transport`] type provided here: a sink of outbound byte frames and a
//! lazy stream of inbound byte frames.

pub mod error;
pub mod memory;
pub mod traits;
pub mod ws;

pub use error::{Result, TransportError};
pub use traits::{FrameSink, FrameStream, Transport, TransportInfo};
pub use ws::{connect, connect_with_timeout, PendingUpgrade, WsListener};
