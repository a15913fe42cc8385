//! The `Hasher` collaborator: a stable, collision-resistant digest used to
//! derive on-disk filenames from a key's textual rendering.

/// A stable, collision-resistant digest over a byte string.
///
/// Must be at least 256 bits wide; a 64-bit digest is explicitly
/// insufficient for the disk tier's filename derivation.
pub trait Hasher: Send + Sync + std::fmt::Debug {
    /// Hash `bytes`, returning a hex-encoded digest suitable for use as a
    /// filename component.
    fn hash_hex(&self, bytes: &[u8]) -> String;
}

/// The default `Hasher`, backed by BLAKE3's 256-bit digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    fn hash_hex(&self, bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let h = Blake3Hasher;
        assert_eq!(h.hash_hex(b"same-key"), h.hash_hex(b"same-key"));
    }

    #[test]
    fn digest_distinguishes_inputs() {
        let h = Blake3Hasher;
        assert_ne!(h.hash_hex(b"key-a"), h.hash_hex(b"key-b"));
    }

    #[test]
    fn digest_is_256_bits_hex() {
        let h = Blake3Hasher;
        // 32 bytes -> 64 hex chars.
        assert_eq!(h.hash_hex(b"x").len(), 64);
    }
}
