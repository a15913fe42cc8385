//! Per-tier configuration, built through fluent builders.

use std::time::Duration;

use crate::eviction::EvictionPolicy;

/// A per-entry priority; `Critical` entries are never selected by automatic
/// eviction at any pressure level. Re-exported here for convenience; the
/// canonical definition lives in [`crate::eviction::Priority`].
pub use crate::eviction::Priority;

/// Configuration for a standalone memory tier.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum number of resident entries.
    pub max_items: usize,
    /// Maximum total estimated bytes across resident entries.
    pub max_bytes: u64,
    /// Which eviction policy backs the tier's eviction index.
    pub eviction_policy: EvictionPolicy,
    /// How often the background sweep removes expired entries. `None`
    /// disables the background task; expiration still happens lazily on
    /// access.
    pub cleanup_interval: Option<Duration>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            max_bytes: 256 * 1024 * 1024,
            eviction_policy: EvictionPolicy::Lru,
            cleanup_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl MemoryConfig {
    #[must_use]
    pub fn builder() -> MemoryConfigBuilder {
        MemoryConfigBuilder::default()
    }
}

/// Fluent builder for [`MemoryConfig`].
#[derive(Debug, Default)]
pub struct MemoryConfigBuilder {
    config: MemoryConfig,
}

impl MemoryConfigBuilder {
    #[must_use]
    pub fn max_items(mut self, max_items: usize) -> Self {
        self.config.max_items = max_items;
        self
    }

    #[must_use]
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction_policy = policy;
        self
    }

    #[must_use]
    pub fn cleanup_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn build(self) -> MemoryConfig {
        self.config
    }
}

/// Configuration for a standalone disk tier.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Root directory the tier owns (`manifest`, `data/`, `temp/` live
    /// inside it).
    pub root: std::path::PathBuf,
    /// Maximum total bytes across all files the tier owns. Eviction is
    /// always LRU-by-`last_access_at` regardless of any paired memory
    /// tier's configured policy (§4.5's preserved behaviour).
    pub max_bytes: u64,
    /// How often the background sweep removes expired records and runs
    /// `verify_integrity`.
    pub cleanup_interval: Option<Duration>,
    /// Files at or above this size are read via `mmap` rather than a
    /// buffered read.
    pub mmap_threshold: u64,
}

impl DiskConfig {
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_bytes: 10 * 1024 * 1024 * 1024,
            cleanup_interval: Some(Duration::from_secs(3600)),
            mmap_threshold: 10 * 1024 * 1024,
        }
    }

    #[must_use]
    pub fn builder(root: impl Into<std::path::PathBuf>) -> DiskConfigBuilder {
        DiskConfigBuilder {
            config: Self::new(root),
        }
    }
}

/// Fluent builder for [`DiskConfig`].
#[derive(Debug)]
pub struct DiskConfigBuilder {
    config: DiskConfig,
}

impl DiskConfigBuilder {
    #[must_use]
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn cleanup_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn mmap_threshold(mut self, threshold: u64) -> Self {
        self.config.mmap_threshold = threshold;
        self
    }

    #[must_use]
    pub fn build(self) -> DiskConfig {
        self.config
    }
}

/// Configuration for a hybrid (memory + disk) tier.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// Forwarded to the inner memory tier.
    pub memory_config: MemoryConfig,
    /// Forwarded to the inner disk tier's byte budget.
    pub max_disk_bytes: u64,
    /// If `false`, `set` writes only to memory.
    pub write_to_disk_on_set: bool,
    /// If `true`, a disk hit writes the value back to memory before
    /// returning.
    pub promote_on_disk_hit: bool,
    /// Shared by both inner tiers' background sweeps.
    pub cleanup_interval: Option<Duration>,
    /// Debounce delay for coalesced write-back when
    /// `write_to_disk_on_set` is `false`.
    pub write_back_debounce: Duration,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            memory_config: MemoryConfig::default(),
            max_disk_bytes: 10 * 1024 * 1024 * 1024,
            write_to_disk_on_set: true,
            promote_on_disk_hit: true,
            cleanup_interval: Some(Duration::from_secs(3600)),
            write_back_debounce: Duration::from_millis(500),
        }
    }
}

impl HybridConfig {
    #[must_use]
    pub fn builder() -> HybridConfigBuilder {
        HybridConfigBuilder::default()
    }
}

/// Fluent builder for [`HybridConfig`].
#[derive(Debug, Default)]
pub struct HybridConfigBuilder {
    config: HybridConfig,
}

impl HybridConfigBuilder {
    #[must_use]
    pub fn memory_config(mut self, config: MemoryConfig) -> Self {
        self.config.memory_config = config;
        self
    }

    #[must_use]
    pub fn max_disk_bytes(mut self, max_disk_bytes: u64) -> Self {
        self.config.max_disk_bytes = max_disk_bytes;
        self
    }

    #[must_use]
    pub fn write_to_disk_on_set(mut self, enabled: bool) -> Self {
        self.config.write_to_disk_on_set = enabled;
        self
    }

    #[must_use]
    pub fn promote_on_disk_hit(mut self, enabled: bool) -> Self {
        self.config.promote_on_disk_hit = enabled;
        self
    }

    #[must_use]
    pub fn cleanup_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn write_back_debounce(mut self, debounce: Duration) -> Self {
        self.config.write_back_debounce = debounce;
        self
    }

    #[must_use]
    pub fn build(self) -> HybridConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_config_builder_overrides_defaults() {
        let config = MemoryConfig::builder()
            .max_items(5)
            .eviction_policy(EvictionPolicy::Lfu)
            .build();
        assert_eq!(config.max_items, 5);
        assert_eq!(config.eviction_policy, EvictionPolicy::Lfu);
    }

    #[test]
    fn disk_config_defaults() {
        let config = DiskConfig::new("/tmp/cache");
        assert_eq!(config.root, std::path::PathBuf::from("/tmp/cache"));
        assert!(config.max_bytes > 0);
    }

    #[test]
    fn hybrid_config_defaults_write_through_and_promote() {
        let config = HybridConfig::default();
        assert!(config.write_to_disk_on_set);
        assert!(config.promote_on_disk_hit);
        assert_eq!(config.write_back_debounce, Duration::from_millis(500));
    }
}
