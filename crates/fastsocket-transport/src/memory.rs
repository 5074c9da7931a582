//! In-process transport pair.
//!
//! Both ends behave like an established WebSocket connection: frames written
//! on one side are yielded in order on the other, and closing (or dropping)
//! the write half ends the peer's stream. Used by tests and by embedders that
//! want the dispatch machinery without a socket.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{stream, Sink};
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{FrameSink, FrameStream, Transport, TransportInfo};

/// Create two connected in-memory transports.
pub fn pair() -> (Transport, Transport) {
    pair_with_labels("memory-left", "memory-right")
}

/// Create two connected in-memory transports with explicit peer labels.
///
/// `left`'s peer label is `right_label` and vice versa.
pub fn pair_with_labels(left_label: &str, right_label: &str) -> (Transport, Transport) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();

    let left = build(left_tx, left_rx, right_label);
    let right = build(right_tx, right_rx, left_label);
    (left, right)
}

fn build(
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    peer: &str,
) -> Transport {
    let sink: FrameSink = Box::pin(MemorySink { tx: Some(tx) });
    let stream: FrameStream = Box::pin(stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok(frame), rx))
    }));
    Transport::from_parts(
        sink,
        stream,
        TransportInfo {
            peer: peer.to_string(),
            path: None,
        },
    )
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl Sink<Bytes> for MemorySink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        match &self.tx {
            Some(tx) if !tx.is_closed() => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(TransportError::Closed)),
        }
    }

    fn start_send(self: Pin<&mut Self>, frame: Bytes) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.tx = None;
        Poll::Ready(Ok(()))
    }
}
