//! The memory tier: a bounded, in-process map with a pluggable eviction
//! index and lazy + background expiration.
//!
//! Mutation is serialised behind a single `parking_lot::RwLock` guarding the
//! map and a `parking_lot::Mutex` guarding the eviction index's bookkeeping,
//! mirroring the lock shape the teacher's tiered cache used around its L1 —
//! one coarse lock per tier rather than per-entry locking.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use strata_core::{Clock, Error, Result, SystemClock};

use crate::config::MemoryConfig;
use crate::eviction::{build_index, EntryMeta, EvictionIndex, Priority};
use crate::expiration::{Expiration, ExpirationPolicy, ExpirationSnapshot};
use crate::observer::{Event, EventKind, EvictionReason, Observer, ObserverRegistry, ObserverToken};
use crate::stats::{TierStats, TierStatsSnapshot};

/// A single resident value plus the bookkeeping the eviction index and
/// expiration model both read from.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_access_at: Instant,
    pub access_count: u64,
    pub expires_at: Option<Instant>,
    pub size_bytes: u64,
    pub priority: Priority,
    pub tags: Vec<String>,
}

impl<V> Entry<V> {
    fn meta(&self) -> EntryMeta {
        EntryMeta {
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            last_access_at: self.last_access_at,
            expires_at: self.expires_at,
            priority: self.priority,
        }
    }

    fn expiration_snapshot(&self) -> ExpirationSnapshot {
        ExpirationSnapshot {
            created_at: self.created_at,
            last_access_at: self.last_access_at,
            access_count: self.access_count,
            size_bytes: self.size_bytes,
            tags: self.tags.clone(),
        }
    }
}

/// Options accompanying an insert, beyond the key and value.
#[derive(Debug, Clone)]
pub struct SetOptions {
    pub expiration: Expiration,
    pub size_bytes: u64,
    pub priority: Priority,
    pub tags: Vec<String>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            expiration: Expiration::Never,
            size_bytes: 0,
            priority: Priority::Normal,
            tags: Vec::new(),
        }
    }
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    total_bytes: u64,
}

/// A bounded, in-memory cache tier.
pub struct MemoryTier<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    inner: RwLock<Inner<K, V>>,
    index: Mutex<Box<dyn EvictionIndex<K>>>,
    config: MemoryConfig,
    clock: Arc<dyn Clock>,
    expiration_policy: Option<Box<dyn ExpirationPolicy>>,
    stats: TierStats,
    observers: ObserverRegistry<K>,
    shutdown: Arc<Notify>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> std::fmt::Debug for MemoryTier<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemoryTier")
            .field("items", &inner.entries.len())
            .field("bytes", &inner.total_bytes)
            .finish()
    }
}

impl<K, V> MemoryTier<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    /// Build a tier with the system clock and no composite expiration
    /// policy beyond each entry's own `Expiration`.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a tier with an injected clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(config: MemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let index = build_index(config.eviction_policy);
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
            }),
            index: Mutex::new(index),
            config,
            clock,
            expiration_policy: None,
            stats: TierStats::new(),
            observers: ObserverRegistry::new(),
            shutdown: Arc::new(Notify::new()),
            cleanup_handle: Mutex::new(None),
        }
    }

    /// Attach a cross-cutting expiration policy, evaluated in addition to
    /// each entry's own per-key `Expiration`.
    #[must_use]
    pub fn with_expiration_policy(mut self, policy: Box<dyn ExpirationPolicy>) -> Self {
        self.expiration_policy = Some(policy);
        self
    }

    /// Register an observer, returning a token that later unregisters it.
    pub fn on_event(&self, observer: Box<dyn Observer<K>>) -> ObserverToken {
        self.observers.register(observer)
    }

    /// Unregister a previously registered observer.
    pub fn remove_observer(&self, token: ObserverToken) {
        self.observers.unregister(token);
    }

    /// Start the background cleanup sweep, if `cleanup_interval` is
    /// configured. No-op if already running.
    pub fn start_background_tasks(self: &Arc<Self>) {
        let Some(interval) = self.config.cleanup_interval else {
            return;
        };
        let mut handle_slot = self.cleanup_handle.lock();
        if handle_slot.is_some() {
            return;
        }
        let tier = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        *handle_slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = tier.remove_expired();
                        if removed > 0 {
                            debug!(removed, "memory tier background sweep");
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        }));
    }

    /// Stop the background cleanup sweep.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        if let Some(deadline) = entry.expires_at {
            if now >= deadline {
                return true;
            }
        }
        if let Some(policy) = &self.expiration_policy {
            if policy.should_expire(&entry.expiration_snapshot(), now) {
                return true;
            }
        }
        false
    }

    /// Look up `key`. Lazily evicts (and reports as a miss) if the entry
    /// has expired.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.write();
            let expired = inner
                .entries
                .get(key)
                .map(|entry| self.is_expired(entry, now));
            match expired {
                Some(true) => {
                    let removed = inner.entries.remove(key).expect("checked above");
                    inner.total_bytes = inner.total_bytes.saturating_sub(removed.size_bytes);
                    drop(inner);
                    self.index.lock().on_remove(key);
                    self.stats.record_expiration();
                    self.stats.record_miss();
                    self.observers
                        .notify(Event::new(Some(key.clone()), EventKind::Expired));
                    return None;
                }
                Some(false) => {}
                None => {
                    self.stats.record_miss();
                    return None;
                }
            }
            let entry = inner.entries.get_mut(key).expect("checked above");
            entry.last_access_at = now;
            entry.access_count += 1;
            let meta = entry.meta();
            let value = entry.value.clone();
            drop(inner);
            self.index.lock().on_access(key, &meta);
            self.stats.record_hit();
            Some(value)
        }
    }

    /// Insert or replace `key`. Evicts existing entries to make room per
    /// the configured policy if the tier is over its count or byte budget
    /// afterwards; returns [`Error::CapacityExceeded`] if a single value
    /// cannot fit even after evicting every non-critical entry.
    ///
    /// # Errors
    /// Returns [`Error::CapacityExceeded`] if `value` alone exceeds
    /// `max_bytes`, or if only critical-priority entries remain and the
    /// tier is still over budget.
    pub fn set(&self, key: K, value: V, options: SetOptions) -> Result<()> {
        let now = self.clock.now();
        if options.size_bytes > self.config.max_bytes {
            return Err(Error::CapacityExceeded);
        }
        let expires_at = options.expiration.resolve(now);
        let is_update;
        {
            let mut inner = self.inner.write();
            let previous_bytes = inner.entries.get(&key).map(|e| e.size_bytes).unwrap_or(0);
            is_update = inner.entries.contains_key(&key);
            inner.entries.insert(
                key.clone(),
                Entry {
                    value,
                    created_at: now,
                    last_access_at: now,
                    access_count: 0,
                    expires_at,
                    size_bytes: options.size_bytes,
                    priority: options.priority,
                    tags: options.tags,
                },
            );
            inner.total_bytes = inner.total_bytes - previous_bytes + options.size_bytes;
        }
        let meta = {
            let inner = self.inner.read();
            inner.entries.get(&key).expect("just inserted").meta()
        };
        {
            let mut index = self.index.lock();
            if is_update {
                index.on_update(&key, &meta);
            } else {
                index.on_insert(&key, &meta);
            }
        }
        self.evict_to_fit();
        self.update_gauges();
        self.observers.notify(Event::new(
            Some(key),
            if is_update {
                EventKind::Updated
            } else {
                EventKind::Added
            },
        ));
        Ok(())
    }

    /// Evict entries until both the count and byte budgets are satisfied,
    /// or until no non-critical candidate remains.
    fn evict_to_fit(&self) {
        loop {
            let over_count;
            let over_bytes;
            let candidates: Vec<K>;
            {
                let inner = self.inner.read();
                over_count = inner.entries.len() > self.config.max_items;
                over_bytes = inner.total_bytes > self.config.max_bytes;
                if !over_count && !over_bytes {
                    return;
                }
                candidates = inner
                    .entries
                    .iter()
                    .filter(|(_, e)| !e.priority.is_critical())
                    .map(|(k, _)| k.clone())
                    .collect();
            }
            if candidates.is_empty() {
                warn!("memory tier over budget but no evictable candidates remain");
                return;
            }
            let victim = {
                let inner = self.inner.read();
                let metadata_of = |k: &K| inner.entries.get(k).map(Entry::meta);
                let mut index = self.index.lock();
                index.pick_victims(1, &metadata_of, &candidates)
            };
            let Some(victim_key) = victim.into_iter().next() else {
                warn!("eviction index returned no victim among eligible candidates");
                return;
            };
            let reason = if over_bytes {
                EvictionReason::ByteLimit
            } else {
                EvictionReason::Capacity
            };
            self.remove_internal(&victim_key, EventKind::Evicted(reason));
            self.stats.record_eviction();
        }
    }

    fn remove_internal(&self, key: &K, kind: EventKind) -> Option<Entry<V>> {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.entries.remove(key);
            if let Some(entry) = &removed {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
            }
            removed
        };
        if removed.is_some() {
            self.index.lock().on_remove(key);
            self.observers.notify(Event::new(Some(key.clone()), kind));
        }
        removed
    }

    /// Remove `key`, returning whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.remove_internal(key, EventKind::Removed).is_some();
        self.update_gauges();
        removed
    }

    /// Remove every entry.
    pub fn remove_all(&self) {
        let keys: Vec<K> = {
            let inner = self.inner.read();
            inner.entries.keys().cloned().collect()
        };
        for key in &keys {
            self.index.lock().on_remove(key);
        }
        {
            let mut inner = self.inner.write();
            inner.entries.clear();
            inner.total_bytes = 0;
        }
        self.update_gauges();
        self.observers.notify(Event::new(None, EventKind::Cleared));
    }

    /// Whether `key` is present and not expired, without updating access
    /// bookkeeping.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now();
        let inner = self.inner.read();
        inner
            .entries
            .get(key)
            .is_some_and(|entry| !self.is_expired(entry, now))
    }

    /// Sweep and remove every expired entry, reporting the count removed.
    pub fn remove_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<K> = {
            let inner = self.inner.read();
            inner
                .entries
                .iter()
                .filter(|(_, e)| self.is_expired(e, now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in &expired {
            self.remove_internal(key, EventKind::Expired);
            self.stats.record_expiration();
        }
        self.update_gauges();
        expired.len()
    }

    /// Forcibly evict roughly `percentage` (0.0-1.0) of resident,
    /// non-critical entries per the configured policy.
    pub fn evict_percentage(&self, percentage: f64) -> usize {
        let percentage = percentage.clamp(0.0, 1.0);
        let candidates: Vec<K> = {
            let inner = self.inner.read();
            inner
                .entries
                .iter()
                .filter(|(_, e)| !e.priority.is_critical())
                .map(|(k, _)| k.clone())
                .collect()
        };
        let n = ((candidates.len() as f64) * percentage).ceil() as usize;
        if n == 0 {
            return 0;
        }
        let victims = {
            let inner = self.inner.read();
            let metadata_of = |k: &K| inner.entries.get(k).map(Entry::meta);
            let mut index = self.index.lock();
            index.pick_victims(n, &metadata_of, &candidates)
        };
        for key in &victims {
            self.remove_internal(key, EventKind::Evicted(EvictionReason::Manual));
            self.stats.record_eviction();
        }
        self.update_gauges();
        victims.len()
    }

    /// Update `key`'s expiration in place, without otherwise touching the
    /// entry's value or access bookkeeping.
    pub fn update_expiration(&self, key: &K, expiration: Expiration) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.expires_at = expiration.resolve(now);
            true
        } else {
            false
        }
    }

    /// Same as [`MemoryTier::get`] but also returns a snapshot of the
    /// entry's bookkeeping. Counts as an access: lazily expires a stale
    /// entry, and otherwise touches `last_access_at`/`access_count` and
    /// notifies the eviction index exactly as `get` does.
    #[must_use]
    pub fn get_with_metadata(&self, key: &K) -> Option<(V, EntryMeta)> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let expired = inner
            .entries
            .get(key)
            .map(|entry| self.is_expired(entry, now));
        match expired {
            Some(true) => {
                let removed = inner.entries.remove(key).expect("checked above");
                inner.total_bytes = inner.total_bytes.saturating_sub(removed.size_bytes);
                drop(inner);
                self.index.lock().on_remove(key);
                self.stats.record_expiration();
                self.stats.record_miss();
                self.observers
                    .notify(Event::new(Some(key.clone()), EventKind::Expired));
                None
            }
            Some(false) => {
                let entry = inner.entries.get_mut(key).expect("checked above");
                entry.last_access_at = now;
                entry.access_count += 1;
                let meta = entry.meta();
                let value = entry.value.clone();
                drop(inner);
                self.index.lock().on_access(key, &meta);
                self.stats.record_hit();
                Some((value, meta))
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    fn update_gauges(&self) {
        let inner = self.inner.read();
        self.stats.set_items(inner.entries.len() as u64);
        self.stats.set_bytes(inner.total_bytes);
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> TierStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total estimated resident bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.inner.read().total_bytes
    }
}

impl<K, V> Drop for MemoryTier<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::EvictionPolicy;
    use std::time::Duration;
    use strata_core::FakeClock;

    fn options(size_bytes: u64) -> SetOptions {
        SetOptions {
            size_bytes,
            ..Default::default()
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let tier: MemoryTier<String, String> = MemoryTier::new(MemoryConfig::default());
        tier.set("k".into(), "v".into(), options(1)).unwrap();
        assert_eq!(tier.get(&"k".to_string()), Some("v".to_string()));
    }

    #[test]
    fn capacity_exceeded_when_value_too_large() {
        let config = MemoryConfig::builder().max_bytes(10).build();
        let tier: MemoryTier<String, String> = MemoryTier::new(config);
        let err = tier.set("k".into(), "v".into(), options(100)).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded));
    }

    #[test]
    fn evicts_lru_when_over_item_count() {
        let config = MemoryConfig::builder()
            .max_items(2)
            .eviction_policy(EvictionPolicy::Lru)
            .build();
        let tier: MemoryTier<String, String> = MemoryTier::new(config);
        tier.set("a".into(), "1".into(), options(1)).unwrap();
        tier.set("b".into(), "2".into(), options(1)).unwrap();
        tier.set("c".into(), "3".into(), options(1)).unwrap();
        assert_eq!(tier.len(), 2);
        assert!(!tier.contains(&"a".to_string()));
    }

    #[test]
    fn critical_priority_survives_eviction_pressure() {
        let config = MemoryConfig::builder().max_items(1).build();
        let tier: MemoryTier<String, String> = MemoryTier::new(config);
        tier.set(
            "keep".into(),
            "v".into(),
            SetOptions {
                priority: Priority::Critical,
                size_bytes: 1,
                ..Default::default()
            },
        )
        .unwrap();
        tier.set("other".into(), "v".into(), options(1)).unwrap();
        assert!(tier.contains(&"keep".to_string()));
    }

    #[test]
    fn expired_entry_is_lazily_evicted_on_get() {
        let clock = Arc::new(FakeClock::new());
        let tier: MemoryTier<String, String> =
            MemoryTier::with_clock(MemoryConfig::default(), clock.clone());
        tier.set(
            "k".into(),
            "v".into(),
            SetOptions {
                expiration: Expiration::After(Duration::from_secs(1)),
                size_bytes: 1,
                ..Default::default()
            },
        )
        .unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(tier.get(&"k".to_string()), None);
        assert_eq!(tier.stats().expirations, 1);
    }

    #[test]
    fn remove_all_clears_everything() {
        let tier: MemoryTier<String, String> = MemoryTier::new(MemoryConfig::default());
        tier.set("a".into(), "1".into(), options(1)).unwrap();
        tier.set("b".into(), "2".into(), options(1)).unwrap();
        tier.remove_all();
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn evict_percentage_removes_roughly_requested_share() {
        let tier: MemoryTier<String, String> = MemoryTier::new(MemoryConfig::default());
        for i in 0..10 {
            tier.set(format!("k{i}"), "v".into(), options(1)).unwrap();
        }
        let removed = tier.evict_percentage(0.5);
        assert_eq!(removed, 5);
        assert_eq!(tier.len(), 5);
    }
}
