//! The disk tier: size-bounded, content-addressed persistent storage.
//!
//! Directory layout under the configured root:
//! `manifest` (the index, see [`crate::manifest`]), `data/<key-hash>.blob`
//! (one file per entry), `temp/` (scratch space for atomic writes). Eviction
//! is always oldest-accessed-first regardless of any paired memory tier's
//! configured policy — §4.5 deliberately fixes this rather than exposing a
//! pluggable index on disk, since disk eviction is rare enough that the
//! simplicity is worth more than the flexibility.

use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use strata_core::{Error, Hasher, Result};

use crate::codec::Codec;
use crate::config::DiskConfig;
use crate::expiration::Expiration;
use crate::observer::{Event, EventKind, EvictionReason, Observer, ObserverRegistry, ObserverToken};
use crate::manifest::{now_secs, FileMetadata, Manifest};
use crate::stats::{TierStats, TierStatsSnapshot};

/// Options accompanying a disk `set`, beyond the key and value.
#[derive(Debug, Clone, Default)]
pub struct DiskSetOptions {
    pub expiration: Expiration,
    pub critical: bool,
}

/// A size-bounded, persistent, content-addressed cache tier.
pub struct DiskTier<K, V, C> {
    root: PathBuf,
    manifest: Manifest,
    config: DiskConfig,
    codec: C,
    hasher: Arc<dyn Hasher>,
    stats: TierStats,
    observers: ObserverRegistry<String>,
    shutdown: Arc<Notify>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V, C> std::fmt::Debug for DiskTier<K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTier")
            .field("root", &self.root)
            .field("entries", &self.manifest.len())
            .finish()
    }
}

impl<K, V, C> DiskTier<K, V, C>
where
    K: ToString + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Send + Sync + std::fmt::Debug + 'static,
    C: Codec<V>,
{
    /// Open (or create) a disk tier rooted at `config.root`, using a Blake3
    /// hasher. Timestamps are always wall-clock (`SystemTime`), not the
    /// injected [`strata_core::Clock`] used by the memory tier, since the
    /// manifest must survive a process restart and `Clock` only exposes a
    /// monotonic [`std::time::Instant`].
    ///
    /// # Errors
    /// Returns [`Error::DiskIo`] if the directory layout cannot be created
    /// or the manifest cannot be read.
    pub fn open(config: DiskConfig, codec: C) -> Result<Self> {
        Self::open_with(config, codec, Arc::new(strata_core::Blake3Hasher))
    }

    /// Open with an injected hasher, for deterministic tests.
    ///
    /// # Errors
    /// Returns [`Error::DiskIo`] if the directory layout cannot be created
    /// or the manifest cannot be read.
    pub fn open_with(config: DiskConfig, codec: C, hasher: Arc<dyn Hasher>) -> Result<Self> {
        fs::create_dir_all(&config.root).map_err(|e| Error::disk_io(&config.root, e))?;
        fs::create_dir_all(config.root.join("data")).map_err(|e| Error::disk_io(&config.root, e))?;
        fs::create_dir_all(config.root.join("temp")).map_err(|e| Error::disk_io(&config.root, e))?;
        let manifest = Manifest::open(config.root.join("manifest"))?;
        let root = config.root.clone();
        Ok(Self {
            root,
            manifest,
            config,
            codec,
            hasher,
            stats: TierStats::new(),
            observers: ObserverRegistry::new(),
            shutdown: Arc::new(Notify::new()),
            cleanup_handle: Mutex::new(None),
            _marker: PhantomData,
        })
    }

    fn key_hash(&self, key: &K) -> String {
        self.hasher.hash_hex(key.to_string().as_bytes())
    }

    fn blob_path(&self, key_hash: &str) -> PathBuf {
        self.root.join("data").join(format!("{key_hash}.blob"))
    }

    /// Register an observer, returning a token that later unregisters it.
    /// Events are reported with the entry's stringified key, since the
    /// disk tier's manifest is string-keyed internally.
    pub fn on_event(&self, observer: Box<dyn Observer<String>>) -> ObserverToken {
        self.observers.register(observer)
    }

    /// Unregister a previously registered observer.
    pub fn remove_observer(&self, token: ObserverToken) {
        self.observers.unregister(token);
    }

    /// Start the background cleanup sweep (expiration purge + integrity
    /// check), if `cleanup_interval` is configured. No-op if already
    /// running.
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
                        let repaired = tier.verify_integrity();
                        if removed > 0 || repaired > 0 {
                            debug!(removed, repaired, "disk tier background sweep");
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

    /// Look up `key`, decoding its stored bytes. Returns `Ok(None)` on a
    /// clean miss (absent, expired, or the underlying blob went missing
    /// out from under the manifest).
    ///
    /// # Errors
    /// Returns [`Error::CodecDecode`] if the stored bytes fail to decode,
    /// or [`Error::DiskIo`] if the blob cannot be read.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let key_string = key.to_string();
        let Some(meta) = self.manifest.get(&key_string) else {
            self.stats.record_miss();
            return Ok(None);
        };
        let now = now_secs();
        if meta.is_expired(now) {
            self.manifest.remove(&key_string);
            self.manifest.flush()?;
            self.stats.record_expiration();
            self.stats.record_miss();
            self.observers
                .notify(Event::new(Some(key_string.clone()), EventKind::Expired));
            return Ok(None);
        }
        let path = self.blob_path(&meta.key_hash);
        if !path.exists() {
            warn!(path = %path.display(), "manifest entry missing its blob");
            self.manifest.remove(&key_string);
            self.stats.record_integrity_eviction();
            self.stats.record_miss();
            self.observers.notify(Event::new(
                Some(key_string.clone()),
                EventKind::Evicted(EvictionReason::Integrity),
            ));
            return Ok(None);
        }
        let bytes = self.read_blob(&path)?;
        let value = self.codec.decode(&bytes)?;
        self.manifest.touch(&key_string);
        self.stats.record_hit();
        Ok(Some(value))
    }

    fn read_blob(&self, path: &Path) -> Result<Vec<u8>> {
        if let Ok(metadata) = fs::metadata(path) {
            if metadata.len() >= self.config.mmap_threshold {
                let file = fs::File::open(path).map_err(|e| Error::disk_io(path, e))?;
                // SAFETY: file is opened read-only for the duration of this
                // call and not concurrently truncated by this process.
                let mmap = unsafe {
                    memmap2::MmapOptions::new()
                        .map(&file)
                        .map_err(|e| Error::disk_io(path, e))?
                };
                return Ok(mmap.to_vec());
            }
        }
        fs::read(path).map_err(|e| Error::disk_io(path, e))
    }

    /// Encode and persist `value` under `key`, writing the blob atomically
    /// (temp file + rename) and updating the manifest. Evicts other
    /// entries to make room per the fixed oldest-accessed-first policy if
    /// the tier is over its byte budget afterwards.
    ///
    /// # Errors
    /// Returns [`Error::CodecEncode`] if `value` cannot be encoded, or
    /// [`Error::DiskIo`] / [`Error::CapacityExceeded`] on write/eviction
    /// failure.
    pub fn set(&self, key: &K, value: &V, options: DiskSetOptions) -> Result<()> {
        let key_string = key.to_string();
        let key_hash = self.key_hash(key);
        let bytes = self.codec.encode(value)?;
        if bytes.len() as u64 > self.config.max_bytes {
            return Err(Error::CapacityExceeded);
        }
        let content_hash = self.hasher.hash_hex(&bytes);
        let path = self.blob_path(&key_hash);
        self.write_atomic(&path, &bytes)?;

        let now = now_secs();
        let is_update = self.manifest.contains(&key_string);
        let created_at = self
            .manifest
            .get(&key_string)
            .map_or(now, |existing| existing.created_at);
        self.manifest.insert(FileMetadata {
            key: key_string.clone(),
            key_hash,
            size_bytes: bytes.len() as u64,
            created_at,
            last_access_at: now,
            access_count: 0,
            expires_at: options.expiration.resolve_secs(now),
            content_hash,
            critical: options.critical,
        });
        self.manifest.flush()?;

        self.evict_to_fit()?;

        self.observers.notify(Event::new(
            Some(key_string),
            if is_update {
                EventKind::Updated
            } else {
                EventKind::Added
            },
        ));
        Ok(())
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_dir = self.root.join("temp");
        let mut temp = NamedTempFile::new_in(&temp_dir).map_err(|e| Error::disk_io(&temp_dir, e))?;
        temp.write_all(data).map_err(|e| Error::disk_io(path, e))?;
        temp.flush().map_err(|e| Error::disk_io(path, e))?;
        temp.persist(path).map_err(|e| Error::disk_io(path, e.error))?;
        Ok(())
    }

    fn evict_to_fit(&self) -> Result<()> {
        loop {
            let usage = self.manifest.total_size();
            if usage <= self.config.max_bytes {
                return Ok(());
            }
            let candidates: Vec<FileMetadata> = self
                .manifest
                .find_oldest(usize::MAX)
                .into_iter()
                .filter(|e| !e.critical)
                .collect();
            let Some(victim) = candidates.into_iter().next() else {
                warn!("disk tier over budget but no evictable entries remain");
                return Ok(());
            };
            let victim_key = victim.key.clone();
            self.remove_blob_and_manifest(&victim.key, &victim.key_hash);
            self.stats.record_eviction();
            self.observers.notify(Event::new(
                Some(victim_key),
                EventKind::Evicted(EvictionReason::ByteLimit),
            ));
        }
    }

    fn remove_blob_and_manifest(&self, key: &str, key_hash: &str) {
        let path = self.blob_path(key_hash);
        if path.exists() {
            let _ = fs::remove_file(&path);
        }
        self.manifest.remove(key);
        let _ = self.manifest.flush();
    }

    /// Remove `key`, returning whether it was present.
    ///
    /// # Errors
    /// Returns [`Error::DiskIo`] if the manifest cannot be flushed.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let key_string = key.to_string();
        let Some(meta) = self.manifest.get(&key_string) else {
            return Ok(false);
        };
        self.remove_blob_and_manifest(&key_string, &meta.key_hash);
        self.observers
            .notify(Event::new(Some(key_string), EventKind::Removed));
        Ok(true)
    }

    /// Remove every entry and blob.
    ///
    /// # Errors
    /// Returns [`Error::DiskIo`] if the data directory cannot be cleared.
    pub fn remove_all(&self) -> Result<()> {
        let data_dir = self.root.join("data");
        if data_dir.exists() {
            fs::remove_dir_all(&data_dir).map_err(|e| Error::disk_io(&data_dir, e))?;
            fs::create_dir_all(&data_dir).map_err(|e| Error::disk_io(&data_dir, e))?;
        }
        self.manifest.clear();
        self.manifest.flush()?;
        self.observers.notify(Event::new(None, EventKind::Cleared));
        Ok(())
    }

    /// Whether `key` is present and not expired.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let key_string = key.to_string();
        self.manifest
            .get(&key_string)
            .is_some_and(|meta| !meta.is_expired(now_secs()))
    }

    /// Sweep and remove every expired entry, reporting the count removed.
    pub fn remove_expired(&self) -> usize {
        let now = now_secs();
        let expired = self.manifest.find_expired(now);
        for key in &expired {
            if let Some(meta) = self.manifest.get(key) {
                self.remove_blob_and_manifest(key, &meta.key_hash);
                self.stats.record_expiration();
                self.observers
                    .notify(Event::new(Some(key.clone()), EventKind::Expired));
            }
        }
        expired.len()
    }

    /// Recompute each entry's blob digest and drop any entry whose blob is
    /// missing or whose digest no longer matches the manifest's recorded
    /// `content_hash`. Returns the number of entries repaired.
    pub fn verify_integrity(&self) -> usize {
        let mut repaired = 0;
        for meta in self.manifest.entries() {
            let path = self.blob_path(&meta.key_hash);
            let ok = match fs::read(&path) {
                Ok(bytes) => self.hasher.hash_hex(&bytes) == meta.content_hash,
                Err(_) => false,
            };
            if !ok {
                self.remove_blob_and_manifest(&meta.key, &meta.key_hash);
                self.stats.record_integrity_eviction();
                self.observers.notify(Event::new(
                    Some(meta.key.clone()),
                    EventKind::Evicted(EvictionReason::Integrity),
                ));
                repaired += 1;
            }
        }
        repaired
    }

    /// Current total bytes actually occupied on disk, computed by walking
    /// `data/` and summing each blob file's real size. Deliberately
    /// independent of `self.manifest.total_size()` (the manifest's own
    /// bookkeeping) so the two can be compared to detect divergence
    /// between what the manifest believes is stored and what is actually
    /// on disk.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        walkdir::WalkDir::new(self.root.join("data"))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum()
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    /// Whether the tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> TierStatsSnapshot {
        self.stats.snapshot()
    }

    /// Flush the manifest to disk.
    ///
    /// # Errors
    /// Returns [`Error::DiskIo`] on failure.
    pub fn flush(&self) -> Result<()> {
        self.manifest.flush()
    }

    /// Encode `value` with this tier's codec and report the resulting byte
    /// length, without writing anything. Used by the hybrid tier to size a
    /// value it is promoting or preloading into memory.
    ///
    /// # Errors
    /// Returns [`Error::CodecEncode`] if `value` cannot be encoded.
    pub fn encoded_size(&self, value: &V) -> Result<u64> {
        Ok(self.codec.encode(value)?.len() as u64)
    }
}

impl<K, V, C> Drop for DiskTier<K, V, C> {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        let _ = self.manifest.flush();
    }
}
