//! Per-connection read loop.
//!
//! Every inbound frame is decoded and then routed in one of two ways:
//! 1. If a request is waiting on the message's id, the message resolves it
//!    and is not dispatched further.
//! 2. Otherwise it is queued for the handler worker, which invokes handlers
//!    one message at a time in arrival order.
//!
//! Replies are routed on the read task itself, so a slow handler never
//! delays delivery of a reply. The handler queue is bounded: when it is
//! full, further unsolicited messages are dropped and reported as
//! [`DispatchError::QueueFull`] rather than stalling the read loop.

use fastsocket_message::Message;
use fastsocket_transport::FrameStream;
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::DEFAULT_HANDLER_QUEUE_CAPACITY;
use crate::connection::Connection;
use crate::error::DispatchError;
use crate::registry::HandlerRegistry;

/// Lifecycle of a connection's read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Reading and routing frames.
    Running,
    /// The loop stopped; pending requests are being cancelled.
    Closing,
    /// Teardown finished. Terminal.
    Closed,
}

/// Why a read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    Remote,
    /// [`Connection::close`] was called, or a write failed.
    Requested,
    /// Reading failed.
    Transport(String),
}

/// Owns the read half of a connection and routes what arrives on it.
pub struct Dispatcher {
    connection: Connection,
    stream: FrameStream,
    registry: HandlerRegistry,
    queue_capacity: usize,
}

impl Dispatcher {
    pub fn new(connection: Connection, stream: FrameStream, registry: HandlerRegistry) -> Self {
        Self {
            connection,
            stream,
            registry,
            queue_capacity: DEFAULT_HANDLER_QUEUE_CAPACITY,
        }
    }

    /// Bound the number of unsolicited messages waiting for handlers.
    /// Values below 1 are raised to 1.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> JoinHandle<CloseReason> {
        tokio::spawn(self.run())
    }

    /// Read until the connection ends, then tear it down.
    ///
    /// Undecodable frames are reported and skipped; they never stop the loop.
    pub async fn run(self) -> CloseReason {
        let Self {
            connection,
            mut stream,
            registry,
            queue_capacity,
        } = self;
        let shutdown = connection.shutdown_token();

        let (work_tx, work_rx) = mpsc::channel(queue_capacity);
        tokio::spawn(handler_worker(
            registry.clone(),
            connection.clone(),
            work_rx,
        ));

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break CloseReason::Requested,
                next = stream.next() => next,
            };

            let frame = match next {
                None => break CloseReason::Remote,
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    warn!(connection = connection.id(), error = %err, "read failed");
                    break CloseReason::Transport(err.to_string());
                }
            };

            let message = match connection.codec().decode(frame) {
                Ok(message) => message,
                Err(err) => {
                    warn!(
                        connection = connection.id(),
                        error = %err,
                        frame = %err.preview(),
                        "dropping undecodable frame"
                    );
                    registry.report(&DispatchError::Decode(err));
                    continue;
                }
            };

            if connection.pending().fulfill(&message) {
                continue;
            }
            trace!(
                connection = connection.id(),
                kind = message.kind(),
                id = %message.id(),
                "queueing unsolicited message"
            );
            match work_tx.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    warn!(
                        connection = connection.id(),
                        kind = message.kind(),
                        id = %message.id(),
                        capacity = queue_capacity,
                        "handler queue full; message dropped"
                    );
                    registry.report(&DispatchError::QueueFull {
                        kind: message.kind().to_string(),
                        id: message.id().clone(),
                        capacity: queue_capacity,
                    });
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(connection = connection.id(), "handler worker stopped; message dropped");
                }
            }
        };

        connection.set_state(DispatcherState::Closing);
        shutdown.cancel();
        let cancelled = connection.pending().cancel_all("connection closed");
        connection.close_sink().await;
        // Queued messages are still handled; the worker exits once drained.
        drop(work_tx);
        connection.set_state(DispatcherState::Closed);

        info!(
            connection = connection.id(),
            peer = %connection.peer(),
            ?reason,
            cancelled,
            "connection closed"
        );
        reason
    }
}

async fn handler_worker(
    registry: HandlerRegistry,
    connection: Connection,
    mut queue: mpsc::Receiver<Message>,
) {
    while let Some(message) = queue.recv().await {
        registry.dispatch(message, &connection).await;
    }
    debug!(connection = connection.id(), "handler worker finished");
}
