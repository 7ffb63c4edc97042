//! Shared key generation for storage backends.

use depot_core::validation::sanitize_key_segment;
use uuid::Uuid;

pub const QUARANTINE_PREFIX: &str = "quarantine";
pub const HEALTHY_PREFIX: &str = "artifacts";

/// Key a client writes to before completion.
pub fn quarantine_key(owner_id: Uuid, upload_id: Uuid, filename: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        QUARANTINE_PREFIX,
        owner_id,
        upload_id,
        sanitize_key_segment(filename)
    )
}

/// Key of the single healthy object holding `content_hash` for an owner.
pub fn healthy_key(owner_id: Uuid, content_hash: &str) -> String {
    format!("{}/{}/{}", HEALTHY_PREFIX, owner_id, content_hash)
}

pub fn is_quarantine_key(key: &str) -> bool {
    key.starts_with(QUARANTINE_PREFIX) && key[QUARANTINE_PREFIX.len()..].starts_with('/')
}

/// Reject keys that could escape the bucket or directory root.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains("..") && !key.starts_with('/') && !key.contains('\\')
}
