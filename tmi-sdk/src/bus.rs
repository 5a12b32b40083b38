//! In-process publish/subscribe for [`Envelope`]s.
//!
//! Publishing is synchronous: every matching subscriber has the envelope in
//! its queue before `publish` returns, so subscribers observe events in
//! exactly the order they were published. Subscriber queues are unbounded;
//! a subscriber that is dropped is pruned on the next publish.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::event::{Envelope, Event, EventKind};

struct Subscriber {
    filter: Option<EventKind>,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Cloneable handle to the shared bus.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, envelope: Envelope) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if sub.filter.is_some_and(|kind| kind != envelope.kind()) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(envelope.clone()).is_ok()
        });
    }

    /// Publish an event that did not come from a protocol line.
    pub fn emit(&self, event: Event) {
        self.publish(Envelope::control(event));
    }

    /// Subscribe to one kind of event. Each call starts a fresh sequence
    /// beginning with the next published event.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.add(Some(kind))
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.add(None)
    }

    fn add(&self, filter: Option<EventKind>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { filter, tx });
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A lazily consumed, unbounded sequence of events.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}
