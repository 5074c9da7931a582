//! Type-tag keyed handler table and the dispatch step that invokes it.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use fastsocket_message::Message;
use futures_util::FutureExt;
use tracing::{error, trace, warn};

use crate::config::UnhandledPolicy;
use crate::connection::Connection;
use crate::error::{DispatchError, HandlerError};

/// Tag whose handler runs for every inbound message that is not a reply.
pub const WILDCARD_TAG: &str = "ALL";

pub type HandlerResult = std::result::Result<(), HandlerError>;
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Callback invoked for every failure caught at the dispatch boundary.
pub type ErrorCallback = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Asynchronous message handler.
///
/// Implemented for any `Fn(Message, Connection) -> impl Future<Output = HandlerResult>`,
/// so closures and `async fn`s register directly. The [`Connection`] lets the
/// handler reply on the connection the message arrived on.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, message: Message, connection: Connection) -> BoxFuture<HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Message, Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, message: Message, connection: Connection) -> BoxFuture<HandlerResult> {
        Box::pin(self(message, connection))
    }
}

struct RegistryInner {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
    policy: RwLock<UnhandledPolicy>,
    on_error: RwLock<ErrorCallback>,
}

/// Shared mapping from type tag to handler.
///
/// One registry is shared by every connection of a client or server. It is
/// safe to register handlers while messages are being dispatched; a dispatch
/// sees the table as it was when the lookup happened.
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create an empty registry with the default unhandled policy.
    pub fn new() -> Self {
        Self::with_policy(UnhandledPolicy::default())
    }

    /// Create an empty registry with an explicit unhandled policy.
    pub fn with_policy(policy: UnhandledPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                handlers: RwLock::new(HashMap::new()),
                policy: RwLock::new(policy),
                on_error: RwLock::new(Arc::new(log_dispatch_error)),
            }),
        }
    }

    /// Register `handler` for `kind`.
    ///
    /// The last registration for a tag wins. Returns `true` if an earlier
    /// handler was replaced.
    pub fn register<H: Handler>(&self, kind: impl Into<String>, handler: H) -> bool {
        let kind = kind.into();
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let replaced = handlers.insert(kind.clone(), Arc::new(handler)).is_some();
        if replaced {
            warn!(kind = %kind, "replaced existing handler");
        }
        replaced
    }

    /// Remove the handler for `kind`. Returns `true` if one was registered.
    pub fn unregister(&self, kind: &str) -> bool {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(kind)
            .is_some()
    }

    /// Handler currently registered for `kind`.
    pub fn lookup(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.lookup(kind).is_some()
    }

    /// Registered tags, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let handlers = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut kinds: Vec<String> = handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn policy(&self) -> UnhandledPolicy {
        *self
            .inner
            .policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_policy(&self, policy: UnhandledPolicy) {
        *self
            .inner
            .policy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Replace the error callback. The default logs through `tracing`.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(callback);
    }

    /// Hand `err` to the error callback.
    ///
    /// A panicking callback is logged and contained; it never unwinds into
    /// the read loop.
    pub fn report(&self, err: &DispatchError) {
        let callback = self
            .inner
            .on_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(err))) {
            error!(
                error = %err,
                panic = %panic_message(payload.as_ref()),
                "error callback panicked"
            );
        }
    }

    /// Invoke the handlers matching `message`.
    ///
    /// Runs the handler registered for the message's tag, then the
    /// [`WILDCARD_TAG`] handler if one is registered. Handler errors and
    /// panics are reported through the error callback and never propagate.
    /// Returns the number of handlers invoked.
    pub async fn dispatch(&self, message: Message, connection: &Connection) -> usize {
        let tagged = self.lookup(message.kind());
        let wildcard = if message.kind() == WILDCARD_TAG {
            None
        } else {
            self.lookup(WILDCARD_TAG)
        };

        if tagged.is_none() && wildcard.is_none() {
            self.unhandled(&message);
            return 0;
        }

        let mut invoked = 0;
        if let Some(handler) = tagged {
            self.invoke(handler, message.clone(), connection.clone()).await;
            invoked += 1;
        }
        if let Some(handler) = wildcard {
            self.invoke(handler, message, connection.clone()).await;
            invoked += 1;
        }
        invoked
    }

    async fn invoke(&self, handler: Arc<dyn Handler>, message: Message, connection: Connection) {
        let kind = message.kind().to_string();
        let id = message.id().clone();
        trace!(kind = %kind, id = %id, "invoking handler");

        let call = AssertUnwindSafe(async move { handler.call(message, connection).await });
        match call.catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => self.report(&DispatchError::Handler { kind, id, source }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.report(&DispatchError::Panicked { kind, id, message });
            }
        }
    }

    fn unhandled(&self, message: &Message) {
        match self.policy() {
            UnhandledPolicy::Ignore => {
                trace!(kind = message.kind(), id = %message.id(), "ignoring unhandled message");
            }
            UnhandledPolicy::Log => {
                warn!(kind = message.kind(), id = %message.id(), "no handler registered; message dropped");
            }
            UnhandledPolicy::Error => self.report(&DispatchError::Unhandled {
                kind: message.kind().to_string(),
                id: message.id().clone(),
            }),
        }
    }
}

fn log_dispatch_error(err: &DispatchError) {
    match err {
        // Already logged by the read loop.
        DispatchError::Decode(_) | DispatchError::QueueFull { .. } => {}
        DispatchError::Unhandled { .. } => warn!(error = %err, "unhandled message"),
        DispatchError::Handler { .. } | DispatchError::Panicked { .. } => {
            error!(error = %err, "message handler failed");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use fastsocket_message::MessageId;
    use fastsocket_transport::memory;
    use serde_json::json;

    use super::*;
    use crate::config::PeerConfig;

    async fn noop(_message: Message, _connection: Connection) -> HandlerResult {
        Ok(())
    }

    async fn failing(_message: Message, _connection: Connection) -> HandlerResult {
        Err("boom".into())
    }

    async fn exploding(_message: Message, _connection: Connection) -> HandlerResult {
        panic!("handler exploded")
    }

    fn test_connection() -> (Connection, fastsocket_transport::Transport) {
        let (local, remote) = memory::pair();
        let (connection, _read_loop) =
            Connection::open(local, HandlerRegistry::new(), &PeerConfig::default());
        (connection, remote)
    }

    fn collect_errors(registry: &HandlerRegistry) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on_error(move |err| sink.lock().expect("lock").push(err.to_string()));
        seen
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = HandlerRegistry::new();
        assert!(!registry.register("PING", noop));
        assert!(registry.register("PING", noop));
        assert_eq!(registry.kinds(), vec!["PING".to_string()]);

        assert!(registry.unregister("PING"));
        assert!(!registry.contains("PING"));
    }

    #[tokio::test]
    async fn dispatch_runs_tagged_then_wildcard() {
        let registry = HandlerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&order);
        registry.register("PING", move |m: Message, _c: Connection| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().expect("lock").push(format!("PING:{}", m.id()));
                Ok::<(), HandlerError>(())
            }
        });
        let seen = Arc::clone(&order);
        registry.register(WILDCARD_TAG, move |m: Message, _c: Connection| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().expect("lock").push(format!("ALL:{}", m.kind()));
                Ok::<(), HandlerError>(())
            }
        });

        let (connection, _remote) = test_connection();
        let invoked = registry
            .dispatch(Message::new(1, "PING", json!({})), &connection)
            .await;
        assert_eq!(invoked, 2);
        assert_eq!(*order.lock().expect("lock"), vec!["PING:1", "ALL:PING"]);

        let invoked = registry
            .dispatch(Message::new(2, "OTHER", json!({})), &connection)
            .await;
        assert_eq!(invoked, 1);
    }

    #[tokio::test]
    async fn wildcard_tagged_message_runs_once() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&count);
        registry.register(WILDCARD_TAG, move |_m: Message, _c: Connection| {
            let seen = Arc::clone(&seen);
            async move {
                *seen.lock().expect("lock") += 1;
                Ok::<(), HandlerError>(())
            }
        });

        let (connection, _remote) = test_connection();
        registry
            .dispatch(Message::new(1, WILDCARD_TAG, json!({})), &connection)
            .await;
        assert_eq!(*count.lock().expect("lock"), 1);
    }

    #[tokio::test]
    async fn handler_error_is_reported_not_raised() {
        let registry = HandlerRegistry::new();
        let errors = collect_errors(&registry);
        registry.register("PING", failing);

        let (connection, _remote) = test_connection();
        registry
            .dispatch(Message::new(5, "PING", json!({})), &connection)
            .await;

        let errors = errors.lock().expect("lock");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("boom"), "unexpected error: {}", errors[0]);
    }

    #[tokio::test]
    async fn handler_panic_is_caught() {
        let registry = HandlerRegistry::new();
        let errors = collect_errors(&registry);
        registry.register("PING", exploding);

        let (connection, _remote) = test_connection();
        registry
            .dispatch(Message::new(6, "PING", json!({})), &connection)
            .await;

        let errors = errors.lock().expect("lock");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("panicked"));
        assert!(errors[0].contains("handler exploded"));
    }

    #[tokio::test]
    async fn panicking_error_callback_is_contained() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&calls);
        registry.on_error(move |_err| {
            *seen.lock().expect("lock") += 1;
            panic!("callback exploded");
        });
        registry.register("PING", failing);

        let (connection, _remote) = test_connection();
        let invoked = registry
            .dispatch(Message::new(7, "PING", json!({})), &connection)
            .await;
        assert_eq!(invoked, 1);
        registry.report(&DispatchError::Unhandled {
            kind: "X".to_string(),
            id: MessageId::from(1),
        });
        assert_eq!(*calls.lock().expect("lock"), 2);
    }

    #[tokio::test]
    async fn unhandled_policy_error_reports() {
        let registry = HandlerRegistry::with_policy(UnhandledPolicy::Error);
        let errors = collect_errors(&registry);

        let (connection, _remote) = test_connection();
        let invoked = registry
            .dispatch(Message::new(8, "NOPE", json!({})), &connection)
            .await;

        assert_eq!(invoked, 0);
        let errors = errors.lock().expect("lock");
        assert_eq!(errors.as_slice(), ["no handler registered for 'NOPE' (message 8)"]);
    }

    #[tokio::test]
    async fn unhandled_policy_ignore_is_silent() {
        let registry = HandlerRegistry::with_policy(UnhandledPolicy::Ignore);
        let errors = collect_errors(&registry);

        let (connection, _remote) = test_connection();
        registry
            .dispatch(Message::new(9, "NOPE", json!({})), &connection)
            .await;
        assert!(errors.lock().expect("lock").is_empty());
    }
}
