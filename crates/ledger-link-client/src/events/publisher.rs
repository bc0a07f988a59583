/*
[INPUT]:  Event kinds, handler closures, emitted event values
[OUTPUT]: Ordered synchronous delivery to registered handlers
[POS]:    Event layer - typed publish/subscribe used by requests and the client
[UPDATE]: When changing handler ordering or once-semantics
*/

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::error;

/// An event that can be routed by kind.
pub trait Event {
    type Kind: Copy + Eq + Hash + fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by registration; pass it to `remove_listener` to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

pub type Handler<E> = Box<dyn FnMut(&E) + Send>;

struct Listener<E> {
    id: ListenerId,
    once: bool,
    handler: Handler<E>,
}

/// Typed mapping from event kind to an ordered list of handlers.
///
/// Handlers run synchronously on the emitting context, in registration order
/// within a kind. No ordering is promised across kinds. A panicking handler is
/// logged and skipped; the remaining handlers still run.
pub struct Publisher<E: Event> {
    listeners: HashMap<E::Kind, Vec<Listener<E>>>,
    next_id: u64,
}

impl<E: Event> Publisher<E> {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register a persistent handler.
    pub fn on<F>(&mut self, kind: E::Kind, handler: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = self.allocate_id();
        self.insert(kind, id, false, Box::new(handler));
        id
    }

    /// Register a handler removed after its first invocation.
    pub fn once<F>(&mut self, kind: E::Kind, handler: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = self.allocate_id();
        self.insert(kind, id, true, Box::new(handler));
        id
    }

    /// Register with an id allocated elsewhere (the client hands ids out before
    /// the registration reaches the worker).
    pub fn insert(&mut self, kind: E::Kind, id: ListenerId, once: bool, handler: Handler<E>) {
        self.next_id = self.next_id.max(id.get() + 1);
        self.listeners
            .entry(kind)
            .or_default()
            .push(Listener { id, once, handler });
    }

    /// Returns `true` if the handler was still registered.
    pub fn remove_listener(&mut self, kind: E::Kind, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|listener| listener.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(&kind);
        }
        removed
    }

    /// Invoke every handler registered for the event's kind and return how many ran.
    pub fn emit(&mut self, event: &E) -> usize {
        let kind = event.kind();
        let Some(list) = self.listeners.get_mut(&kind) else {
            return 0;
        };

        // once-handlers leave the list before running
        let mut fired = 0;
        let mut index = 0;
        while index < list.len() {
            if list[index].once {
                let mut listener = list.remove(index);
                invoke(&kind, listener.id, &mut listener.handler, event);
            } else {
                let listener = &mut list[index];
                invoke(&kind, listener.id, &mut listener.handler, event);
                index += 1;
            }
            fired += 1;
        }

        if list.is_empty() {
            self.listeners.remove(&kind);
        }
        fired
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    fn allocate_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }
}

fn invoke<E, K: fmt::Debug>(kind: &K, id: ListenerId, handler: &mut Handler<E>, event: &E) {
    if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
        error!(?kind, listener = id.get(), "event handler panicked");
    }
}

impl<E: Event> Default for Publisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Publisher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .listeners
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("Publisher").field("listeners", &counts).finish()
    }
}
