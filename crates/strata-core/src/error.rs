//! Error types for the caching engine.
//!
//! `NotFound` is deliberately absent from this enum: per the error model,
//! a missing or expired key is represented as `Ok(None)`, never as `Err`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by a memory, disk, or hybrid tier.
#[derive(Debug, Error)]
pub enum Error {
    /// `set` could not make room because every resident entry is `critical`
    /// priority and the eviction index yielded no victim.
    #[error("capacity exceeded: cannot evict enough entries to fit new value")]
    CapacityExceeded,

    /// A value could not be turned into bytes by the configured codec.
    #[error("codec encode failure: {0}")]
    CodecEncode(String),

    /// Bytes read back from a tier could not be turned into a value by the
    /// configured codec. On the read path this collapses to a miss; this
    /// variant exists for callers that invoke a codec directly.
    #[error("codec decode failure: {0}")]
    CodecDecode(String),

    /// The underlying filesystem refused an operation the disk tier needed.
    #[error("disk I/O failure at {path}: {source}")]
    DiskIo {
        /// The path of the file or directory involved.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest record and its backing file diverged (missing file, size
    /// mismatch, or undecodable manifest). The tier has already repaired the
    /// divergence by removing the record; this is reported, not recoverable.
    #[error("integrity failure for key `{key}`: {reason}")]
    Integrity {
        /// Textual rendering of the offending key.
        key: String,
        /// What was wrong.
        reason: String,
    },

    /// The cache was used after `remove_all` completed during teardown.
    /// Treated by callers identically to `NotFound`.
    #[error("cache invalidated")]
    Invalidated,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a codec encode failure, capturing the inner error's message.
    pub fn codec_encode(err: impl std::fmt::Display) -> Self {
        Self::CodecEncode(err.to_string())
    }

    /// Wrap a codec decode failure, capturing the inner error's message.
    pub fn codec_decode(err: impl std::fmt::Display) -> Self {
        Self::CodecDecode(err.to_string())
    }

    /// Wrap an I/O error with the path that triggered it.
    pub fn disk_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DiskIo {
            path: path.into(),
            source,
        }
    }

    /// Build an integrity-failure error for a key.
    pub fn integrity(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should be logged-and-swallowed rather than
    /// propagated, per the background-task and async-flush error model.
    #[must_use]
    pub const fn is_recoverable_in_background(&self) -> bool {
        matches!(self, Self::DiskIo { .. } | Self::Integrity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_exceeded_display() {
        let err = Error::CapacityExceeded;
        assert_eq!(
            err.to_string(),
            "capacity exceeded: cannot evict enough entries to fit new value"
        );
    }

    #[test]
    fn codec_encode_wraps_message() {
        let err = Error::codec_encode("unsupported type");
        assert!(matches!(err, Error::CodecEncode(ref m) if m == "unsupported type"));
    }

    #[test]
    fn disk_io_background_recoverable() {
        let err = Error::disk_io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_recoverable_in_background());
        assert!(!Error::CapacityExceeded.is_recoverable_in_background());
    }

    #[test]
    fn integrity_includes_key_and_reason() {
        let err = Error::integrity("k1", "size mismatch");
        assert!(err.to_string().contains("k1"));
        assert!(err.to_string().contains("size mismatch"));
    }
}
