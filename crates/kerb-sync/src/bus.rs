//! Typed publish/subscribe relay for inbound real-time events.
//!
//! Any part of the UI can observe gateway events without holding a reference
//! to the connection. Topics map to fixed payload types; handlers run
//! synchronously in registration order and every subscriber sees every event
//! exactly once per publish. There is no buffering — events published before
//! a subscription are gone.
//!
//! The bus is an explicitly constructed value passed by reference (cloning is
//! cheap), not a module-level global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use kerb_types::models::{ConnectionStatus, InboundMessage, MechanicPosition};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct TopicRegistry<T> {
    handlers: Mutex<Vec<(u64, Handler<T>)>>,
}

impl<T> TopicRegistry<T> {
    fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, id: u64, handler: Handler<T>) {
        self.handlers
            .lock()
            .expect("bus lock poisoned")
            .push((id, handler));
    }

    fn unsubscribe(&self, id: u64) {
        // No-op if the handler is already gone
        self.handlers
            .lock()
            .expect("bus lock poisoned")
            .retain(|(hid, _)| *hid != id);
    }

    fn publish(&self, payload: &T) {
        // Snapshot under the lock, invoke outside it, so a handler may
        // subscribe or unsubscribe without deadlocking.
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .expect("bus lock poisoned")
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        for handler in snapshot {
            handler(payload);
        }
    }
}

struct BusInner {
    next_id: AtomicU64,
    new_message: TopicRegistry<InboundMessage>,
    mechanic_location: TopicRegistry<MechanicPosition>,
    connection_status: TopicRegistry<ConnectionStatus>,
}

/// Process-wide event relay. Construct once at the composition root and pass
/// clones to whoever needs to observe or publish.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(0),
                new_message: TopicRegistry::new(),
                mechanic_location: TopicRegistry::new(),
                connection_status: TopicRegistry::new(),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Observe inbound chat messages (`newMessage` topic).
    pub fn on_new_message(
        &self,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id();
        self.inner.new_message.subscribe(id, Arc::new(handler));
        let inner = self.inner.clone();
        Subscription::new(move || inner.new_message.unsubscribe(id))
    }

    pub fn publish_new_message(&self, message: &InboundMessage) {
        self.inner.new_message.publish(message);
    }

    /// Observe live mechanic positions (`mechanicLocation` topic).
    pub fn on_mechanic_location(
        &self,
        handler: impl Fn(&MechanicPosition) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id();
        self.inner.mechanic_location.subscribe(id, Arc::new(handler));
        let inner = self.inner.clone();
        Subscription::new(move || inner.mechanic_location.unsubscribe(id))
    }

    pub fn publish_mechanic_location(&self, position: &MechanicPosition) {
        self.inner.mechanic_location.publish(position);
    }

    /// Observe transport up/down transitions (`connectionStatus` topic).
    pub fn on_connection_status(
        &self,
        handler: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id();
        self.inner.connection_status.subscribe(id, Arc::new(handler));
        let inner = self.inner.clone();
        Subscription::new(move || inner.connection_status.unsubscribe(id))
    }

    pub fn publish_connection_status(&self, status: &ConnectionStatus) {
        self.inner.connection_status.publish(status);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its handler when dropped, so closing a screen deregisters on the
/// same turn as the close action whatever the exit path.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Explicitly remove the handler now.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}
