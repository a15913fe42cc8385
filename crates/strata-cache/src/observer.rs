//! The event hook: a token-registered, fire-and-forget observer mechanism.
//!
//! Delivery happens after a tier has released its internal locks, so an
//! observer calling back into the cache does not deadlock against the
//! mutation that triggered its own notification. A thread-local flag
//! additionally detects re-entrant dispatch on the same thread (an observer
//! that calls a cache operation which itself fires an event) and refuses to
//! recurse, per the re-entrancy prohibition in the design notes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Why an entry was evicted, attached to [`EventKind::Evicted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The count budget was exceeded.
    Capacity,
    /// The byte budget was exceeded.
    ByteLimit,
    /// A manifest/file divergence was repaired.
    Integrity,
    /// Eviction requested directly by a caller (e.g. `evict_percentage`).
    Manual,
}

/// The kind of mutation a single event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Updated,
    Removed,
    Evicted(EvictionReason),
    Expired,
    Cleared,
    Error,
}

/// A single observer notification. `key` is `None` for cache-wide events
/// (`Cleared`, background `Error`).
#[derive(Debug, Clone)]
pub struct Event<K> {
    pub key: Option<K>,
    pub kind: EventKind,
}

impl<K> Event<K> {
    #[must_use]
    pub fn new(key: Option<K>, kind: EventKind) -> Self {
        Self { key, kind }
    }
}

/// An observer of cache mutation events.
pub trait Observer<K>: Send + Sync {
    /// Handle one event. Must not call back into the cache that dispatched
    /// it; doing so is detected and the re-entrant dispatch is dropped.
    fn on_event(&self, event: &Event<K>);
}

impl<K, F: Fn(&Event<K>) + Send + Sync> Observer<K> for F {
    fn on_event(&self, event: &Event<K>) {
        self(event);
    }
}

/// An opaque handle returned on registration, used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

thread_local! {
    static DISPATCHING: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// The token-keyed registry of observers for one cache instance.
#[derive(Debug, Default)]
pub struct ObserverRegistry<K> {
    next_token: AtomicU64,
    observers: RwLock<HashMap<u64, Box<dyn Observer<K>>>>,
}

impl<K> ObserverRegistry<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            observers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `observer`, returning a token that can later unregister it.
    pub fn register(&self, observer: Box<dyn Observer<K>>) -> ObserverToken {
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.observers.write().insert(id, observer);
        ObserverToken(id)
    }

    /// Unregister the observer identified by `token`. No-op if already
    /// unregistered.
    pub fn unregister(&self, token: ObserverToken) {
        self.observers.write().remove(&token.0);
    }

    /// Deliver `event` to every registered observer, fire-and-forget.
    /// Refuses to run (and logs) if called re-entrantly on this thread.
    pub fn notify(&self, event: Event<K>) {
        let already_dispatching = DISPATCHING.with(|d| d.replace(true));
        if already_dispatching {
            tracing::error!("observer re-entrancy detected; dropping nested event");
            return;
        }
        let observers = self.observers.read();
        for observer in observers.values() {
            observer.on_event(&event);
        }
        drop(observers);
        DISPATCHING.with(|d| d.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn delivers_to_registered_observer() {
        let registry: ObserverRegistry<String> = ObserverRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        registry.register(Box::new(move |_event: &Event<String>| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        registry.notify(Event::new(Some("k".to_string()), EventKind::Added));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_stops_delivery() {
        let registry: ObserverRegistry<String> = ObserverRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let token = registry.register(Box::new(move |_event: &Event<String>| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        registry.unregister(token);
        registry.notify(Event::new(None, EventKind::Cleared));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reentrant_dispatch_is_dropped_not_deadlocked() {
        let registry: Arc<ObserverRegistry<String>> = Arc::new(ObserverRegistry::new());
        let inner = registry.clone();
        let reentrant_calls = Arc::new(AtomicUsize::new(0));
        let reentrant_calls2 = reentrant_calls.clone();
        registry.register(Box::new(move |_event: &Event<String>| {
            reentrant_calls2.fetch_add(1, Ordering::SeqCst);
            inner.notify(Event::new(None, EventKind::Cleared));
        }));
        registry.notify(Event::new(None, EventKind::Cleared));
        // The outer dispatch ran once; the nested one was refused.
        assert_eq!(reentrant_calls.load(Ordering::SeqCst), 1);
    }
}
