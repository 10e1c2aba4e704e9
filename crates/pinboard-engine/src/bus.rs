//! Domain event bus.
//!
//! Local subscribers get a crossbeam channel; dropping the receiver
//! unsubscribes. Cross-client delivery goes through the
//! `EventTransport` port - the engine only depends on
//! publish/subscribe semantics plus self-origin filtering.
//!
//! Filtering happens on receipt: a client ignores its own echo and
//! events for an org other than the active one.

use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender, unbounded};

use pinboard_core::{ClientId, DomainEvent, OrgId};

/// Cross-client broadcast port.
///
/// The production implementation may be any durable or ephemeral
/// broadcast transport (websocket fan-out, BroadcastChannel, ...).
pub trait EventTransport: Send + Sync {
    fn broadcast(&self, event: &DomainEvent);
}

/// Transport that drops everything - single-client setups and tests.
#[derive(Default)]
pub struct NullTransport;

impl EventTransport for NullTransport {
    fn broadcast(&self, _event: &DomainEvent) {}
}

/// In-process transport wiring several buses together, for tests and
/// same-process multi-view setups. Delivery is synchronous.
#[derive(Default)]
pub struct LoopbackTransport {
    peers: Mutex<Vec<Sender<DomainEvent>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer inbox; the bus pumps it via [`EventBus::pump`].
    pub fn register(&self) -> Receiver<DomainEvent> {
        let (tx, rx) = unbounded();
        self.peers.lock().expect("loopback peers poisoned").push(tx);
        rx
    }
}

impl EventTransport for LoopbackTransport {
    fn broadcast(&self, event: &DomainEvent) {
        self.peers
            .lock()
            .expect("loopback peers poisoned")
            .retain(|peer| peer.send(event.clone()).is_ok());
    }
}

pub struct EventBus {
    origin: ClientId,
    active_org: Mutex<Option<OrgId>>,
    subscribers: Mutex<Vec<Sender<DomainEvent>>>,
    transport: Arc<dyn EventTransport>,
    /// Inbox fed by the transport, drained by [`EventBus::pump`].
    inbox: Option<Receiver<DomainEvent>>,
}

impl EventBus {
    pub fn new(origin: ClientId, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            origin,
            active_org: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            transport,
            inbox: None,
        }
    }

    /// Wire this bus to a loopback transport, registering an inbox.
    pub fn with_loopback(origin: ClientId, transport: Arc<LoopbackTransport>) -> Self {
        let inbox = transport.register();
        Self {
            origin,
            active_org: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            transport,
            inbox: Some(inbox),
        }
    }

    pub fn origin(&self) -> ClientId {
        self.origin
    }

    /// Select which org's events this client cares about.
    pub fn set_active_org(&self, org: Option<OrgId>) {
        *self.active_org.lock().expect("active org poisoned") = org;
    }

    /// Subscribe to filtered events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<DomainEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .expect("subscribers poisoned")
            .push(tx);
        rx
    }

    /// Broadcast an event produced by this client.
    ///
    /// Local subscribers are not notified: the state that caused the
    /// event is already visible in the local store.
    pub fn publish(&self, event: DomainEvent) {
        debug_assert_eq!(event.origin, self.origin);
        self.transport.broadcast(&event);
    }

    /// Feed an event received from the transport through the filters
    /// and fan it out to local subscribers. Returns whether the event
    /// passed the filters.
    pub fn receive(&self, event: DomainEvent) -> bool {
        if event.origin == self.origin {
            tracing::trace!(%event.org, "dropping own event echo");
            return false;
        }
        let relevant = self
            .active_org
            .lock()
            .expect("active org poisoned")
            .as_ref()
            .is_some_and(|active| active == &event.org);
        if !relevant {
            tracing::trace!(%event.org, "dropping event for inactive org");
            return false;
        }
        self.subscribers
            .lock()
            .expect("subscribers poisoned")
            .retain(|sub| sub.send(event.clone()).is_ok());
        true
    }

    /// Drain the transport inbox (if wired), filtering each event.
    /// Returns how many events passed the filters.
    pub fn pump(&self) -> usize {
        let Some(inbox) = &self.inbox else {
            return 0;
        };
        let events: Vec<DomainEvent> = inbox.try_iter().collect();
        events.into_iter().filter(|e| self.receive(e.clone())).count()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscribers poisoned").len()
    }
}
