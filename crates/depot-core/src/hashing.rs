//! Content hashing
//!
//! Artifacts are identified by the lowercase hex SHA-256 of their bytes. The
//! hasher is fed chunk by chunk so large objects never sit in memory whole.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const CONTENT_HASH_HEX_LEN: usize = 64;

/// Incremental SHA-256 over a byte stream, tracking the byte count as it goes.
#[derive(Clone, Default)]
pub struct ContentHasher {
    hasher: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes fed so far
    pub fn bytes_seen(&self) -> u64 {
        self.bytes
    }

    /// Consume the hasher, returning `(hex_digest, byte_count)`.
    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.bytes)
    }
}

/// True if `value` looks like a hex SHA-256 digest.
pub fn is_content_hash(value: &str) -> bool {
    value.len() == CONTENT_HASH_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}
