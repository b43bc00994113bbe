//! Typed publish/subscribe
//!
//! Each component owns an [`EventBus`] over its own event enum. Listeners are
//! registered per event kind (or for every kind) and are invoked outside the
//! registry lock, so a listener may subscribe, unsubscribe or emit without
//! deadlocking. Async consumers can also take a broadcast receiver.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 256;

/// An event that can travel over an [`EventBus`]
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Fieldless discriminant used to route listeners
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// The kind of this event
    fn kind(&self) -> Self::Kind;
}

/// Identifies a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    id: ListenerId,
    listener: Listener<E>,
}

/// Typed event bus keyed by event kind
pub struct EventBus<E: BusEvent> {
    /// `None` holds listeners registered for every kind
    listeners: RwLock<HashMap<Option<E::Kind>, Vec<Registration<E>>>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<E>,
}

impl<E: BusEvent> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    /// Register a listener for one event kind
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    /// Register a listener for every event
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        for registrations in listeners.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
        }
        listeners.retain(|_, registrations| !registrations.is_empty());
        removed
    }

    /// Number of listeners registered for a kind (excluding catch-all listeners)
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners
            .read()
            .get(&Some(kind))
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Receive every event asynchronously
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Deliver an event to listeners and subscribers
    pub fn emit(&self, event: E) {
        let kind = event.kind();
        let targets: Vec<Listener<E>> = {
            let listeners = self.listeners.read();
            listeners
                .get(&Some(kind))
                .into_iter()
                .chain(listeners.get(&None))
                .flat_map(|registrations| registrations.iter().map(|r| r.listener.clone()))
                .collect()
        };

        tracing::trace!("Emitting {:?} to {} listener(s)", kind, targets.len());
        for listener in targets {
            listener(&event);
        }

        // No receivers is not an error
        let _ = self.tx.send(event);
    }

    fn register(&self, kind: Option<E::Kind>, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push(Registration { id, listener });
        id
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
