//! The disk tier's manifest: a persisted index of what's on disk, loaded
//! zero-copy via `rkyv` with a JSON fallback for files written by an older
//! format.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use tempfile::NamedTempFile;

use strata_core::Error;

/// Per-file bookkeeping persisted alongside the blob it describes.
#[derive(
    Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize, Debug, Clone, PartialEq, Eq,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct FileMetadata {
    /// The cache key, stringified (disk storage is content-addressed by
    /// the key's digest, not the key type itself).
    pub key: String,
    /// Hex digest of `key`, also the blob's filename stem.
    pub key_hash: String,
    /// Size of the stored (possibly encoded/compressed) blob, in bytes.
    pub size_bytes: u64,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Seconds since the Unix epoch.
    pub last_access_at: u64,
    /// Number of successful reads since creation.
    pub access_count: u64,
    /// Seconds since the Unix epoch; `None` means no deadline.
    pub expires_at: Option<u64>,
    /// Hex digest of the blob's on-disk bytes, checked by
    /// `verify_integrity`.
    pub content_hash: String,
    /// Mirrors `Priority::Critical`; excludes the file from automatic
    /// eviction.
    pub critical: bool,
}

impl FileMetadata {
    /// Whether `now` (seconds since epoch) is at or past `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
struct ManifestData {
    version: u32,
    entries: Vec<FileMetadata>,
}

impl ManifestData {
    const CURRENT_VERSION: u32 = 1;
}

const MANIFEST_MAGIC: &[u8; 8] = b"STRM\0\0\0\0";

/// The disk tier's on-disk index: key → [`FileMetadata`], flushed
/// atomically via temp-file-then-rename.
pub struct Manifest {
    path: PathBuf,
    entries: RwLock<HashMap<String, FileMetadata>>,
    dirty: RwLock<bool>,
}

impl std::fmt::Debug for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manifest")
            .field("path", &self.path)
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl Manifest {
    /// Open (or create empty) the manifest at `path`.
    ///
    /// # Errors
    /// Returns [`Error::DiskIo`] if the existing file cannot be read.
    pub fn open(path: PathBuf) -> Result<Self, Error> {
        let manifest = Self {
            path,
            entries: RwLock::new(HashMap::new()),
            dirty: RwLock::new(false),
        };
        if manifest.path.exists() {
            manifest.load()?;
        }
        Ok(manifest)
    }

    fn load(&self) -> Result<(), Error> {
        let mut file = File::open(&self.path).map_err(|e| Error::disk_io(&self.path, e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| Error::disk_io(&self.path, e))?;
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > MANIFEST_MAGIC.len() && &data[..4] == &MANIFEST_MAGIC[..4] {
            match rkyv::from_bytes::<ManifestData, rkyv::rancor::Error>(&data[MANIFEST_MAGIC.len()..])
            {
                Ok(parsed) if parsed.version == ManifestData::CURRENT_VERSION => {
                    let mut map = HashMap::with_capacity(parsed.entries.len());
                    for entry in parsed.entries {
                        map.insert(entry.key.clone(), entry);
                    }
                    *self.entries.write() = map;
                    return Ok(());
                }
                _ => {
                    tracing::warn!(path = %self.path.display(), "unreadable manifest, starting fresh");
                    return Ok(());
                }
            }
        }
        match sonic_rs::from_slice::<Vec<FileMetadata>>(&data) {
            Ok(entries) => {
                let mut map = HashMap::with_capacity(entries.len());
                for entry in entries {
                    map.insert(entry.key.clone(), entry);
                }
                *self.entries.write() = map;
                *self.dirty.write() = true;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable manifest, starting fresh");
                Ok(())
            }
        }
    }

    /// Atomically persist the manifest, writing to a temp file in the same
    /// directory then renaming over the real path. No-op if nothing has
    /// changed since the last flush.
    ///
    /// # Errors
    /// Returns [`Error::DiskIo`] or [`Error::CodecEncode`] on failure.
    pub fn flush(&self) -> Result<(), Error> {
        if !*self.dirty.read() {
            return Ok(());
        }
        let entries: Vec<FileMetadata> = self.entries.read().values().cloned().collect();
        let manifest_data = ManifestData {
            version: ManifestData::CURRENT_VERSION,
            entries,
        };
        let serialized =
            rkyv::to_bytes::<rkyv::rancor::Error>(&manifest_data).map_err(Error::codec_encode)?;
        let mut framed = Vec::with_capacity(MANIFEST_MAGIC.len() + serialized.len());
        framed.extend_from_slice(MANIFEST_MAGIC);
        framed.extend_from_slice(&serialized);

        let parent = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| Error::disk_io(parent, e))?;
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| Error::disk_io(parent, e))?;
        temp.write_all(&framed)
            .map_err(|e| Error::disk_io(&self.path, e))?;
        temp.flush().map_err(|e| Error::disk_io(&self.path, e))?;
        temp.persist(&self.path)
            .map_err(|e| Error::disk_io(&self.path, e.error))?;

        *self.dirty.write() = false;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<FileMetadata> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, entry: FileMetadata) {
        self.entries.write().insert(entry.key.clone(), entry);
        *self.dirty.write() = true;
    }

    pub fn remove(&self, key: &str) -> Option<FileMetadata> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            *self.dirty.write() = true;
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn touch(&self, key: &str) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(key) {
            entry.last_access_at = now_secs();
            entry.access_count += 1;
            *self.dirty.write() = true;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.entries.read().values().map(|e| e.size_bytes).sum()
    }

    #[must_use]
    pub fn find_expired(&self, now: u64) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys sorted oldest-accessed-first, for the disk tier's fixed-LRU
    /// eviction (§4.5 does not honor a configured eviction policy).
    #[must_use]
    pub fn find_oldest(&self, count: usize) -> Vec<FileMetadata> {
        let entries = self.entries.read();
        let mut sorted: Vec<_> = entries.values().cloned().collect();
        sorted.sort_by_key(|e| e.last_access_at);
        sorted.into_iter().take(count).collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        *self.dirty.write() = true;
    }

    #[must_use]
    pub fn entries(&self) -> Vec<FileMetadata> {
        self.entries.read().values().cloned().collect()
    }
}

impl Drop for Manifest {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(key: &str) -> FileMetadata {
        FileMetadata {
            key: key.to_string(),
            key_hash: blake3::hash(key.as_bytes()).to_hex().to_string(),
            size_bytes: 10,
            created_at: 0,
            last_access_at: 0,
            access_count: 0,
            expires_at: None,
            content_hash: "deadbeef".to_string(),
            critical: false,
        }
    }

    #[test]
    fn insert_then_flush_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.bin");
        {
            let manifest = Manifest::open(path.clone()).unwrap();
            manifest.insert(sample("a"));
            manifest.flush().unwrap();
        }
        let reloaded = Manifest::open(path).unwrap();
        assert!(reloaded.contains("a"));
        assert_eq!(reloaded.get("a").unwrap().size_bytes, 10);
    }

    #[test]
    fn find_expired_reports_deadline_reached() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::open(dir.path().join("manifest.bin")).unwrap();
        let mut entry = sample("stale");
        entry.expires_at = Some(100);
        manifest.insert(entry);
        assert_eq!(manifest.find_expired(50), Vec::<String>::new());
        assert_eq!(manifest.find_expired(200), vec!["stale".to_string()]);
    }

    #[test]
    fn find_oldest_sorts_by_last_access() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::open(dir.path().join("manifest.bin")).unwrap();
        let mut old = sample("old");
        old.last_access_at = 10;
        let mut new = sample("new");
        new.last_access_at = 20;
        manifest.insert(new);
        manifest.insert(old);
        let oldest = manifest.find_oldest(1);
        assert_eq!(oldest[0].key, "old");
    }
}
