//! Map Fingerprinting
//!
//! SHA-256 fingerprint of a map's canonical contents, so operators can tell
//! which map a running match was started with.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type MapDigest = [u8; 32];

/// Incremental hasher with a domain separator.
///
/// Order of updates is significant; callers feed canonical (sorted) data.
pub struct MapHasher {
    hasher: Sha256,
}

impl MapHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for map contents.
    pub fn for_map() -> Self {
        Self::new(b"PUNTER_MAP_V1")
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a length prefix, separating variable-size sections.
    #[inline]
    pub fn update_len(&mut self, len: usize) {
        self.hasher.update((len as u64).to_le_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> MapDigest {
        self.hasher.finalize().into()
    }
}

/// Render a digest as lowercase hex.
pub fn digest_hex(digest: &MapDigest) -> String {
    hex::encode(digest)
}
