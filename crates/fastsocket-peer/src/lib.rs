//! Request/reply correlation and message dispatch for fastsocket.
//!
//! This crate sits on top of [`fastsocket_transport`] and
//! [`fastsocket_message`] and provides:
//! - [`Connection`]: send, request (send and wait for the reply with the same
//!   id) and close, usable from any number of tasks
//! - [`PendingRequestTable`]: the correlation table behind `request`
//! - [`HandlerRegistry`]: type-tag keyed async handlers
//! - [`Client`] and [`Server`]: the two ends of a connection
//!
//! Inbound messages that answer a pending request resolve it and go nowhere
//! else. Everything else is dispatched to the handler registered for its tag.

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod pending;
pub mod registry;
pub mod server;

pub use client::Client;
pub use config::{
    ClientConfig, PeerConfig, ServerConfig, UnhandledPolicy, DEFAULT_BIND_ADDR,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDLER_QUEUE_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use connection::Connection;
pub use dispatcher::{CloseReason, Dispatcher, DispatcherState};
pub use error::{DispatchError, HandlerError, PeerError, Result};
pub use pending::{PendingRequestTable, ReplyOutcome, ReplySlot};
pub use registry::{BoxFuture, ErrorCallback, Handler, HandlerRegistry, HandlerResult, WILDCARD_TAG};
pub use server::{Server, ServerHandle};
