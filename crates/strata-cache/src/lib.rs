//! A general-purpose, in-process caching engine with three composable
//! storage tiers.
//!
//! - [`MemoryTier`]: a bounded in-memory map with a pluggable
//!   [`eviction`] index (LRU, LFU, FIFO, TTL, random, or size-based) and
//!   lazy plus background expiration.
//! - [`DiskTier`]: size-bounded, content-addressed persistent storage
//!   with a [`rkyv`](https://crates.io/crates/rkyv)-backed manifest,
//!   atomic temp-then-rename writes, and periodic integrity
//!   verification against each blob's BLAKE3 digest.
//! - [`HybridTier`]: the two composed — memory-first reads with disk
//!   fallback and promotion, write-through or debounced write-back.
//!
//! Values are moved through either tier as bytes via a pluggable
//! [`codec::Codec`] (structured JSON by default, zero-copy binary via
//! `rkyv`, or a compression/chaining wrapper around either). Callers
//! observe tier mutations through the [`observer`] event hook and read
//! point-in-time counters via [`stats`].
//!
//! ## Example
//!
//! ```no_run
//! use strata_cache::{MemoryConfig, MemoryTier, SetOptions};
//!
//! let tier: MemoryTier<String, Vec<u8>> = MemoryTier::new(MemoryConfig::default());
//! tier.set("key".to_string(), b"value".to_vec(), SetOptions {
//!     size_bytes: 5,
//!     ..Default::default()
//! }).unwrap();
//! assert_eq!(tier.get(&"key".to_string()), Some(b"value".to_vec()));
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(unsafe_code)] // Required for memmap2

mod codec;
mod config;
mod disk;
mod eviction;
mod expiration;
mod hybrid;
mod manifest;
mod memory;
mod observer;
mod stats;

pub use codec::{
    BinaryCodec, ChainedCodec, Codec, CompressedCodec, CompressionAlgorithm, JsonCodec,
};
pub use config::{
    DiskConfig, DiskConfigBuilder, HybridConfig, HybridConfigBuilder, MemoryConfig,
    MemoryConfigBuilder, Priority,
};
pub use disk::{DiskSetOptions, DiskTier};
pub use eviction::{
    build_index, EntryMeta, EvictionIndex, EvictionPolicy, FifoIndex, LfuIndex, LruIndex,
    RandomIndex, SizeIndex, TtlIndex,
};
pub use expiration::{
    AccessCount, Composite, Expiration, ExpirationPolicy, ExpirationSnapshot, Fold, SizeThreshold,
    SlidingWindow, TagSet, TimeAnchor, TimeBased,
};
pub use hybrid::{HybridSetOptions, HybridTier, Source};
pub use manifest::FileMetadata;
pub use memory::{Entry, MemoryTier, SetOptions};
pub use observer::{Event, EventKind, EvictionReason, Observer, ObserverRegistry, ObserverToken};
pub use stats::{HybridStats, HybridStatsSnapshot, TierStats, TierStatsSnapshot};

pub use strata_core::{Blake3Hasher, Clock, Error, FakeClock, Hasher, Result, SystemClock};
