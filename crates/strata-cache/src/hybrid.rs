//! The hybrid tier: a memory tier backed by a disk tier, composing both
//! behind one API. Reads check memory first and fall back to disk,
//! optionally promoting a disk hit back into memory; writes go either
//! straight through to both tiers or, when write-back is configured,
//! land in memory immediately and reach disk only after a short debounce
//! so that bursts of updates to the same key cost one disk write instead
//! of one per `set`.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use strata_core::Result;

use crate::codec::Codec;
use crate::config::HybridConfig;
use crate::disk::{DiskSetOptions, DiskTier};
use crate::expiration::Expiration;
use crate::memory::{MemoryTier, SetOptions};
use crate::observer::{Event, EventKind, Observer, ObserverRegistry, ObserverToken};
use crate::stats::{HybridStats, HybridStatsSnapshot};

/// Where a `get` found its value, reported by [`HybridTier::get_with_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Memory,
    Disk,
    Miss,
}

/// Options accompanying a hybrid `set`, beyond the key and value.
#[derive(Debug, Clone)]
pub struct HybridSetOptions {
    pub expiration: Expiration,
    pub size_bytes: u64,
    pub priority: crate::eviction::Priority,
    pub tags: Vec<String>,
    /// Skip the memory tier entirely for this write (disk-only).
    pub skip_memory: bool,
    /// Skip the disk tier entirely for this write (memory-only).
    pub skip_disk: bool,
    /// Mirrored into the disk tier's manifest; excludes the entry from
    /// disk eviction.
    pub critical: bool,
}

impl Default for HybridSetOptions {
    fn default() -> Self {
        Self {
            expiration: Expiration::Never,
            size_bytes: 0,
            priority: crate::eviction::Priority::Normal,
            tags: Vec::new(),
            skip_memory: false,
            skip_disk: false,
            critical: false,
        }
    }
}

/// A memory tier fronting a disk tier, composing §4.4 and §4.5 behind one
/// read/write/evict surface.
pub struct HybridTier<K, V, C>
where
    K: ToString + Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
    C: Codec<V>,
{
    memory: Arc<MemoryTier<K, V>>,
    disk: Arc<DiskTier<K, V, C>>,
    config: HybridConfig,
    stats: HybridStats,
    observers: ObserverRegistry<K>,
    /// Keys written under write-back since the last debounced flush,
    /// coalesced so a burst of updates to one key costs a single disk
    /// write.
    pending_writes: DashMap<K, (V, DiskSetOptions)>,
    shutdown: Arc<Notify>,
    write_back_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<K, V, C> std::fmt::Debug for HybridTier<K, V, C>
where
    K: ToString + Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
    C: Codec<V>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridTier")
            .field("memory_items", &self.memory.len())
            .field("disk_items", &self.disk.len())
            .field("pending_writes", &self.pending_writes.len())
            .finish()
    }
}

impl<K, V, C> HybridTier<K, V, C>
where
    K: ToString + Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
    C: Codec<V>,
{
    /// Compose a hybrid tier from an already-open disk tier and the given
    /// memory configuration. The disk tier's own budget is left as opened;
    /// `config.max_disk_bytes` is informational only once a tier exists
    /// (rebuild the [`crate::config::DiskConfig`] to change it).
    #[must_use]
    pub fn new(config: HybridConfig, disk: DiskTier<K, V, C>) -> Self {
        Self {
            memory: Arc::new(MemoryTier::new(config.memory_config.clone())),
            disk: Arc::new(disk),
            config,
            stats: HybridStats::new(),
            observers: ObserverRegistry::new(),
            pending_writes: DashMap::new(),
            shutdown: Arc::new(Notify::new()),
            write_back_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Register an observer for hybrid-level events (forwarded in addition
    /// to, not instead of, each inner tier's own observers).
    pub fn on_event(&self, observer: Box<dyn Observer<K>>) -> ObserverToken {
        self.observers.register(observer)
    }

    /// Unregister a previously registered observer.
    pub fn remove_observer(&self, token: ObserverToken) {
        self.observers.unregister(token);
    }

    /// Start both inner tiers' background sweeps, plus the write-back
    /// debounce task if `write_to_disk_on_set` is `false`. No-op for any
    /// task already running.
    pub fn start_background_tasks(self: &Arc<Self>) {
        self.memory.start_background_tasks();
        self.disk.start_background_tasks();
        if self.config.write_to_disk_on_set {
            return;
        }
        let mut handle_slot = self.write_back_handle.lock();
        if handle_slot.is_some() {
            return;
        }
        let tier = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let debounce = self.config.write_back_debounce;
        *handle_slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(debounce);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tier.flush_pending_writes(),
                    _ = shutdown.notified() => {
                        tier.flush_pending_writes();
                        break;
                    }
                }
            }
        }));
    }

    /// Stop all background tasks belonging to this tier (the inner tiers'
    /// own sweeps are stopped independently when they are dropped).
    pub fn shutdown(&self) {
        self.memory.shutdown();
        self.disk.shutdown();
        self.shutdown.notify_waiters();
    }

    fn flush_pending_writes(&self) {
        let pending: Vec<(K, V, DiskSetOptions)> = self
            .pending_writes
            .iter()
            .map(|entry| {
                let (value, options) = entry.value();
                (entry.key().clone(), value.clone(), options.clone())
            })
            .collect();
        if pending.is_empty() {
            return;
        }
        let mut flushed = 0usize;
        for (key, value, options) in pending {
            match self.disk.set(&key, &value, options) {
                Ok(()) => {
                    self.pending_writes.remove(&key);
                    flushed += 1;
                }
                Err(err) if err.is_recoverable_in_background() => {
                    warn!(error = %err, "hybrid write-back failed, will retry next debounce");
                }
                Err(err) => {
                    warn!(error = %err, "hybrid write-back failed permanently, dropping pending write");
                    self.pending_writes.remove(&key);
                }
            }
        }
        if flushed > 0 {
            debug!(flushed, "hybrid tier write-back flush");
        }
    }

    /// Look up `key`, preferring memory, falling back to disk, and
    /// promoting the value back into memory on a disk hit when
    /// `promote_on_disk_hit` is set.
    ///
    /// # Errors
    /// Returns [`strata_core::Error::CodecDecode`] or
    /// [`strata_core::Error::DiskIo`] if the disk tier fails to decode or
    /// read a present entry.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.get_with_source(key)?.0)
    }

    /// Like [`Self::get`], additionally reporting which tier served the
    /// value (or that it was a full miss).
    ///
    /// # Errors
    /// Returns [`strata_core::Error::CodecDecode`] or
    /// [`strata_core::Error::DiskIo`] if the disk tier fails to decode or
    /// read a present entry.
    pub fn get_with_source(&self, key: &K) -> Result<(Option<V>, Source)> {
        if let Some(value) = self.memory.get(key) {
            self.stats.record_memory_hit();
            return Ok((Some(value), Source::Memory));
        }
        let Some(value) = self.disk.get(key)? else {
            self.stats.record_miss();
            return Ok((None, Source::Disk));
        };
        self.stats.record_disk_hit();
        if self.config.promote_on_disk_hit {
            let options = SetOptions {
                size_bytes: self.disk.encoded_size(&value)?,
                ..Default::default()
            };
            self.memory.set(key.clone(), value.clone(), options)?;
        }
        Ok((Some(value), Source::Disk))
    }

    /// Look up `key` in the memory tier only, bypassing disk. Still counts
    /// as a memory hit (or a miss) for this tier's statistics, as if the
    /// lookup had gone through [`Self::get_with_source`].
    #[must_use]
    pub fn get_from_memory(&self, key: &K) -> Option<V> {
        let value = self.memory.get(key);
        if value.is_some() {
            self.stats.record_memory_hit();
        } else {
            self.stats.record_miss();
        }
        value
    }

    /// Look up `key` in the disk tier only, bypassing memory.
    ///
    /// # Errors
    /// Returns [`strata_core::Error::CodecDecode`] or
    /// [`strata_core::Error::DiskIo`] on a decode or read failure.
    pub fn get_from_disk(&self, key: &K) -> Result<Option<V>> {
        self.disk.get(key)
    }

    /// Insert or replace `key` in whichever tiers `options` selects.
    /// Write-through (the default) writes memory then disk synchronously;
    /// write-back writes memory immediately and coalesces the disk write
    /// into the debounced background flush. A disk-write failure during a
    /// synchronous write is logged and swallowed, not propagated — the
    /// memory write remains effective either way.
    ///
    /// # Errors
    /// Returns [`strata_core::Error::CapacityExceeded`] if the value does
    /// not fit the memory tier's budget.
    pub fn set(&self, key: K, value: V, options: HybridSetOptions) -> Result<()> {
        if !options.skip_memory {
            self.memory.set(
                key.clone(),
                value.clone(),
                SetOptions {
                    expiration: options.expiration,
                    size_bytes: options.size_bytes,
                    priority: options.priority,
                    tags: options.tags.clone(),
                },
            )?;
        }
        if !options.skip_disk {
            let disk_options = DiskSetOptions {
                expiration: options.expiration,
                critical: options.critical,
            };
            if self.config.write_to_disk_on_set {
                if let Err(err) = self.disk.set(&key, &value, disk_options) {
                    warn!(error = %err, "hybrid synchronous disk write failed, memory write stands");
                }
            } else {
                self.pending_writes.insert(key.clone(), (value, disk_options));
            }
        }
        self.observers
            .notify(Event::new(Some(key), EventKind::Added));
        Ok(())
    }

    /// Remove `key` from both tiers (and any pending write-back).
    ///
    /// # Errors
    /// Returns a disk I/O error if the disk-side removal fails.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.pending_writes.remove(key);
        let in_memory = self.memory.remove(key);
        let on_disk = self.disk.remove(key)?;
        if in_memory || on_disk {
            self.observers
                .notify(Event::new(Some(key.clone()), EventKind::Removed));
        }
        Ok(in_memory || on_disk)
    }

    /// Remove every entry from both tiers.
    ///
    /// # Errors
    /// Returns a disk I/O error if the disk-side clear fails.
    pub fn remove_all(&self) -> Result<()> {
        self.pending_writes.clear();
        self.memory.remove_all();
        self.disk.remove_all()?;
        self.observers.notify(Event::new(None, EventKind::Cleared));
        Ok(())
    }

    /// Clear only the memory tier, leaving disk intact.
    pub fn clear_memory(&self) {
        self.memory.remove_all();
    }

    /// Clear only the disk tier, leaving memory intact.
    ///
    /// # Errors
    /// Returns a disk I/O error if the clear fails.
    pub fn clear_disk(&self) -> Result<()> {
        self.disk.remove_all()
    }

    /// Read `keys` from disk into memory ahead of first use, bypassing a
    /// disk rewrite (memory is populated directly from the decoded value).
    ///
    /// # Errors
    /// Returns a disk I/O error if an entry's blob cannot be read.
    pub fn preload(&self, keys: impl IntoIterator<Item = K>) -> Result<usize> {
        let mut loaded = 0;
        for key in keys {
            if let Some(value) = self.disk.get(&key)? {
                let options = SetOptions {
                    size_bytes: self.disk.encoded_size(&value)?,
                    ..Default::default()
                };
                self.memory.set(key, value, options)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Force the debounced write-back queue to flush immediately, and
    /// persist the disk tier's manifest.
    ///
    /// # Errors
    /// Returns a disk I/O error if the manifest cannot be flushed.
    pub fn flush(&self) -> Result<()> {
        self.flush_pending_writes();
        self.disk.flush()
    }

    /// The hybrid tier's own hit/miss counters (independent of either
    /// inner tier's own [`crate::stats::TierStats`]).
    #[must_use]
    pub fn stats(&self) -> HybridStatsSnapshot {
        self.stats.snapshot()
    }

    /// Direct access to the inner memory tier, for callers that need its
    /// own statistics or metadata inspection.
    #[must_use]
    pub fn memory_tier(&self) -> &MemoryTier<K, V> {
        &self.memory
    }

    /// Direct access to the inner disk tier, for callers that need its own
    /// statistics or metadata inspection.
    #[must_use]
    pub fn disk_tier(&self) -> &DiskTier<K, V, C> {
        &self.disk
    }
}

impl<K, V, C> Drop for HybridTier<K, V, C>
where
    K: ToString + Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
    C: Codec<V>,
{
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        self.flush_pending_writes();
        let _ = self.disk.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::config::DiskConfig;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Sample {
        value: String,
    }

    fn tier(dir: &std::path::Path, config: HybridConfig) -> HybridTier<String, Sample, JsonCodec<Sample>> {
        let disk_config = DiskConfig::new(dir.join("disk"));
        let disk = DiskTier::open(disk_config, JsonCodec::new()).unwrap();
        HybridTier::new(config, disk)
    }

    #[test]
    fn set_then_get_hits_memory_first() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path(), HybridConfig::default());
        let value = Sample {
            value: "hello".into(),
        };
        tier.set("k".into(), value.clone(), HybridSetOptions::default())
            .unwrap();
        let (got, source) = tier.get_with_source(&"k".to_string()).unwrap();
        assert_eq!(got, Some(value));
        assert_eq!(source, Source::Memory);
    }

    #[test]
    fn disk_hit_promotes_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path(), HybridConfig::default());
        let value = Sample { value: "x".into() };
        tier.set(
            "k".into(),
            value.clone(),
            HybridSetOptions {
                skip_memory: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(tier.get_from_memory(&"k".to_string()).is_none());
        let (got, source) = tier.get_with_source(&"k".to_string()).unwrap();
        assert_eq!(got, Some(value));
        assert_eq!(source, Source::Disk);
        assert!(tier.get_from_memory(&"k".to_string()).is_some());
    }

    #[test]
    fn write_back_coalesces_into_pending_queue() {
        let dir = tempfile::tempdir().unwrap();
        let config = HybridConfig::builder().write_to_disk_on_set(false).build();
        let tier = tier(dir.path(), config);
        let value = Sample { value: "x".into() };
        tier.set("k".into(), value, HybridSetOptions::default())
            .unwrap();
        assert!(tier.get_from_disk(&"k".to_string()).unwrap().is_none());
        tier.flush_pending_writes();
        assert!(tier.get_from_disk(&"k".to_string()).unwrap().is_some());
    }

    #[test]
    fn remove_drops_from_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path(), HybridConfig::default());
        let value = Sample { value: "x".into() };
        tier.set("k".into(), value, HybridSetOptions::default())
            .unwrap();
        assert!(tier.remove(&"k".to_string()).unwrap());
        assert!(tier.get(&"k".to_string()).unwrap().is_none());
        assert!(tier.get_from_disk(&"k".to_string()).unwrap().is_none());
    }

    #[test]
    fn skip_disk_keeps_value_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path(), HybridConfig::default());
        let value = Sample { value: "x".into() };
        tier.set(
            "k".into(),
            value,
            HybridSetOptions {
                skip_disk: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(tier.get_from_memory(&"k".to_string()).is_some());
        assert!(tier.get_from_disk(&"k".to_string()).unwrap().is_none());
    }
}
