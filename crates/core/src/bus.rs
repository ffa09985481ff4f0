//! In-process typed publish/subscribe.
//!
//! The agent loop publishes lifecycle events here without knowing who is
//! listening. Handlers are registered per concrete message type and are
//! invoked concurrently on every publish of that type.
//!
//! Handler lists are copy-on-write: subscribe/unsubscribe replace the list
//! under a mutex, and `publish` clones the current list `Arc` under the same
//! mutex before dispatching outside it. Handlers added or removed while a
//! publish is in flight therefore only affect later publishes.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::mpsc;
use tracing::warn;

/// Error a handler may report. It is logged by the bus, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler returns.
pub type HandlerResult = std::result::Result<(), HandlerError>;

type ErasedMessage = Arc<dyn Any + Send + Sync>;
type ErasedHandler = Arc<dyn Fn(ErasedMessage) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    id: u64,
    handler: ErasedHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<TypeId, Arc<Vec<HandlerEntry>>>,
}

impl Registry {
    fn remove(&mut self, type_id: TypeId, id: u64) {
        if let Some(list) = self.handlers.get_mut(&type_id) {
            Arc::make_mut(list).retain(|entry| entry.id != id);
            if list.is_empty() {
                self.handlers.remove(&type_id);
            }
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a single [`MessageBus::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that completed successfully
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// A process-wide typed message bus.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone, Default)]
pub struct MessageBus {
    registry: Arc<Mutex<Registry>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for messages of type `T`.
    ///
    /// Delivery stops when the returned [`Subscription`] is dropped or
    /// [`unsubscribed`](Subscription::unsubscribe).
    pub fn subscribe<T, F, Fut>(&self, handler: F) -> Subscription
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |message: ErasedMessage| match message.downcast::<T>() {
            Ok(typed) => handler(typed).boxed(),
            Err(_) => futures::future::ready(Err(HandlerError::from("message type mismatch"))).boxed(),
        });

        let type_id = TypeId::of::<T>();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        Arc::make_mut(registry.handlers.entry(type_id).or_default()).push(HandlerEntry { id, handler: erased });

        Subscription {
            registry: Arc::downgrade(&self.registry),
            type_id,
            id,
            active: true,
        }
    }

    /// Forward every `T` into an unbounded channel.
    ///
    /// Useful for streaming events to a UI task. Once the receiver is
    /// dropped, deliveries to this subscription are reported as failures.
    pub fn subscribe_channel<T>(&self) -> (Subscription, mpsc::UnboundedReceiver<Arc<T>>)
    where
        T: Any + Send + Sync,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |message: Arc<T>| {
            let sent = tx
                .send(message)
                .map_err(|_| HandlerError::from("channel receiver dropped"));
            async move { sent }
        });
        (subscription, rx)
    }

    /// Deliver `message` to every handler currently subscribed to `T`.
    ///
    /// Resolves once all handlers have finished. Handler errors and panics
    /// are logged and counted, never propagated. With no subscribers this
    /// is a no-op.
    pub async fn publish<T>(&self, message: T) -> PublishReport
    where
        T: Any + Send + Sync,
    {
        let snapshot = lock(&self.registry).handlers.get(&TypeId::of::<T>()).cloned();
        let Some(handlers) = snapshot else {
            return PublishReport::default();
        };

        let message: ErasedMessage = Arc::new(message);
        let deliveries = handlers.iter().map(|entry| {
            let handler = entry.handler.clone();
            let message = message.clone();
            AssertUnwindSafe(async move { handler(message).await }).catch_unwind()
        });

        let mut report = PublishReport::default();
        for outcome in join_all(deliveries).await {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!(message_type = type_name::<T>(), error = %e, "Message handler failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(message_type = type_name::<T>(), "Message handler panicked");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Number of handlers currently subscribed to `T`.
    pub fn subscriber_count<T: Any>(&self) -> usize {
        lock(&self.registry)
            .handlers
            .get(&TypeId::of::<T>())
            .map_or(0, |list| list.len())
    }
}

/// Handle for a registered handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes its handler"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    type_id: TypeId,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Stop future deliveries to this handler.
    pub fn unsubscribe(self) {}

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.active = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.type_id, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
