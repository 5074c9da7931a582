//! Correlated request/reply and typed message dispatch over WebSocket.
//!
//! fastsocket lets either end of a WebSocket connection send a JSON message
//! and wait for the reply carrying the same id, while every other inbound
//! message is routed to an async handler chosen by its type tag.
//!
//! # Crate Structure
//!
//! - [`transport`]: WebSocket listener/connector and in-memory transport pairs
//! - [`message`]: the `{id, type, data}` envelope and its JSON codec
//! - [`peer`]: correlation table, handler registry, client and server (behind
//!   the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use fastsocket_transport::*;
}

/// Re-export message types.
pub mod message {
    pub use fastsocket_message::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use fastsocket_peer::*;
}

pub use fastsocket_message::{Message, MessageId};
#[cfg(feature = "peer")]
pub use fastsocket_peer::{Client, Connection, Server, ServerHandle};
