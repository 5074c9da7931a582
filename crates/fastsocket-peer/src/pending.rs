//! Correlation table for in-flight requests.
//!
//! Each outstanding request owns a [`ReplySlot`]. The slot resolves exactly
//! once: with the reply routed to it, with a timeout, or with a cancellation
//! when the connection closes. Whichever of those happens first removes the
//! table entry under the lock; the losers find nothing to remove and observe
//! the winner's outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fastsocket_message::{Message, MessageId};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{PeerError, Result};

/// How a reply slot resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// A message with the request's id arrived.
    Reply(Message),
    /// The deadline passed first.
    TimedOut,
    /// The table was shut down before a reply arrived.
    Cancelled(String),
}

#[derive(Debug)]
enum Resolution {
    Reply(Message),
    Cancelled(String),
}

struct PendingEntry {
    generation: u64,
    tx: oneshot::Sender<Resolution>,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<MessageId, PendingEntry>,
    next_generation: u64,
    closed: Option<String>,
}

/// Map from correlation id to the request waiting on it.
///
/// Cloning is cheap and every clone refers to the same table.
#[derive(Clone, Default)]
pub struct PendingRequestTable {
    state: Arc<Mutex<TableState>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a reply slot for `id`.
    ///
    /// Fails with [`PeerError::DuplicateId`] if `id` is already pending and
    /// with [`PeerError::Closed`] once [`cancel_all`](Self::cancel_all) ran.
    pub fn register(&self, id: MessageId) -> Result<ReplySlot> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(PeerError::Closed(reason.clone()));
        }
        if state.entries.contains_key(&id) {
            return Err(PeerError::DuplicateId(id));
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let (tx, rx) = oneshot::channel();
        state.entries.insert(id.clone(), PendingEntry { generation, tx });
        trace!(%id, pending = state.entries.len(), "reply slot registered");

        Ok(ReplySlot {
            table: self.clone(),
            id,
            generation,
            rx,
        })
    }

    /// Route `message` to the request waiting on its id.
    ///
    /// Returns `true` if a slot consumed it. Returns `false` when nothing is
    /// pending under that id (unsolicited message, or a reply that lost the
    /// race against a timeout).
    pub fn fulfill(&self, message: &Message) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.entries.remove(message.id()) else {
            return false;
        };
        // Sent under the lock so a racing timeout sees either the entry or the value.
        let _ = entry.tx.send(Resolution::Reply(message.clone()));
        trace!(id = %message.id(), "reply routed to waiting request");
        true
    }

    /// Wait for `slot` to resolve, for at most `timeout`.
    pub async fn await_reply(&self, slot: ReplySlot, timeout: Duration) -> ReplyOutcome {
        slot.wait(timeout).await
    }

    /// Resolve the request pending under `id` as cancelled.
    pub fn cancel(&self, id: &MessageId, reason: &str) -> bool {
        let mut state = self.lock();
        match state.entries.remove(id) {
            Some(entry) => {
                let _ = entry.tx.send(Resolution::Cancelled(reason.to_string()));
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request and refuse new registrations.
    ///
    /// Returns the number of requests that were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let mut state = self.lock();
        state.closed = Some(reason.to_string());
        let drained: Vec<_> = state.entries.drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.tx.send(Resolution::Cancelled(reason.to_string()));
        }
        if count > 0 {
            debug!(count, reason, "cancelled pending requests");
        }
        count
    }

    /// Number of requests currently waiting.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a request is waiting on `id`.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// True after [`cancel_all`](Self::cancel_all).
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Remove the entry for `id` only if it still belongs to the slot of
    /// `generation`. A reused id registered after a timeout is left alone.
    fn remove_if_current(&self, id: &MessageId, generation: u64) -> bool {
        let mut state = self.lock();
        match state.entries.get(id) {
            Some(entry) if entry.generation == generation => {
                state.entries.remove(id);
                true
            }
            _ => false,
        }
    }
}

/// One outstanding request's claim on its reply.
///
/// Dropping a slot that has not resolved unregisters it, so an abandoned
/// request never leaves a stale entry behind.
pub struct ReplySlot {
    table: PendingRequestTable,
    id: MessageId,
    generation: u64,
    rx: oneshot::Receiver<Resolution>,
}

impl ReplySlot {
    /// Correlation id this slot is waiting on.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Wait for the reply, for at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> ReplyOutcome {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(resolution) => into_outcome(resolution),
            Err(_) => {
                if self.table.remove_if_current(&self.id, self.generation) {
                    return ReplyOutcome::TimedOut;
                }
                // Resolved between the deadline and the removal attempt; the
                // value is already in the channel.
                into_outcome((&mut self.rx).await)
            }
        }
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        self.table.remove_if_current(&self.id, self.generation);
    }
}

impl std::fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySlot")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

fn into_outcome(
    resolution: std::result::Result<Resolution, oneshot::error::RecvError>,
) -> ReplyOutcome {
    match resolution {
        Ok(Resolution::Reply(message)) => ReplyOutcome::Reply(message),
        Ok(Resolution::Cancelled(reason)) => ReplyOutcome::Cancelled(reason),
        Err(_) => ReplyOutcome::Cancelled("pending request table dropped".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pong(id: u64) -> Message {
        Message::new(id, "PONG", json!({"data": "Hello from server!"}))
    }

    #[tokio::test]
    async fn fulfill_delivers_reply_to_waiter() {
        let table = PendingRequestTable::new();
        let slot = table.register(MessageId::from(1)).expect("register should succeed");

        assert!(table.fulfill(&pong(1)));
        let outcome = slot.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, ReplyOutcome::Reply(pong(1)));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_not_consumed() {
        let table = PendingRequestTable::new();
        let _slot = table.register(MessageId::from(1)).expect("register should succeed");

        assert!(!table.fulfill(&pong(2)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn numeric_and_text_ids_do_not_collide() {
        let table = PendingRequestTable::new();
        let _slot = table.register(MessageId::from(2)).expect("register should succeed");

        let text_reply = Message::new("2", "PONG", json!({}));
        assert!(!table.fulfill(&text_reply));
    }

    #[test]
    fn duplicate_pending_id_is_rejected() {
        let table = PendingRequestTable::new();
        let _first = table.register(MessageId::from(7)).expect("register should succeed");

        let second = table.register(MessageId::from(7));
        assert!(
            matches!(second, Err(PeerError::DuplicateId(ref id)) if *id == MessageId::from(7))
        );
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn timeout_removes_entry_and_late_reply_is_unsolicited() {
        let table = PendingRequestTable::new();
        let slot = table.register(MessageId::from(3)).expect("register should succeed");

        let outcome = slot.wait(Duration::from_millis(10)).await;
        assert_eq!(outcome, ReplyOutcome::TimedOut);
        assert!(!table.contains(&MessageId::from(3)));
        assert!(!table.fulfill(&pong(3)));
    }

    #[tokio::test]
    async fn id_can_be_reused_after_timeout() {
        let table = PendingRequestTable::new();
        let first = table.register(MessageId::from(4)).expect("register should succeed");
        assert_eq!(first.wait(Duration::from_millis(1)).await, ReplyOutcome::TimedOut);

        let second = table.register(MessageId::from(4)).expect("reuse should succeed");
        assert!(table.fulfill(&pong(4)));
        assert_eq!(
            second.wait(Duration::from_secs(1)).await,
            ReplyOutcome::Reply(pong(4))
        );
    }

    #[test]
    fn dropping_a_slot_unregisters_it() {
        let table = PendingRequestTable::new();
        let slot = table.register(MessageId::from(5)).expect("register should succeed");
        assert_eq!(table.len(), 1);

        drop(slot);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_resolves_every_waiter_and_closes_table() {
        let table = PendingRequestTable::new();
        let slots: Vec<_> = (0..5)
            .map(|id| table.register(MessageId::from(id)).expect("register should succeed"))
            .collect();

        assert_eq!(table.cancel_all("connection closed"), 5);
        for slot in slots {
            assert_eq!(
                slot.wait(Duration::from_secs(1)).await,
                ReplyOutcome::Cancelled("connection closed".to_string())
            );
        }

        let late = table.register(MessageId::from(99));
        assert!(matches!(late, Err(PeerError::Closed(_))));
        assert!(table.is_closed());
    }

    #[tokio::test]
    async fn cancel_single_request() {
        let table = PendingRequestTable::new();
        let slot = table.register(MessageId::from("a")).expect("register should succeed");

        assert!(table.cancel(&MessageId::from("a"), "caller gave up"));
        assert!(!table.cancel(&MessageId::from("a"), "caller gave up"));
        assert_eq!(
            table.await_reply(slot, Duration::from_secs(1)).await,
            ReplyOutcome::Cancelled("caller gave up".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reply_racing_timeout_resolves_exactly_once() {
        let table = PendingRequestTable::new();

        for round in 0..200u64 {
            let slot = table
                .register(MessageId::from(round))
                .expect("register should succeed");
            let responder = table.clone();
            let reply = pong(round);
            let fulfil = tokio::spawn(async move { responder.fulfill(&reply) });

            let outcome = slot.wait(Duration::from_micros(50)).await;
            let consumed = fulfil.await.expect("fulfill task should not panic");

            match outcome {
                ReplyOutcome::Reply(message) => {
                    assert!(consumed, "round {round}: reply delivered but not consumed");
                    assert_eq!(message.id(), &MessageId::from(round));
                }
                ReplyOutcome::TimedOut => {
                    assert!(!consumed, "round {round}: reply consumed but waiter timed out");
                }
                ReplyOutcome::Cancelled(reason) => panic!("round {round}: cancelled: {reason}"),
            }
            assert!(table.is_empty());
        }
    }
}
