//! ID generation for tasks.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix carried by every generated id.
pub const ID_PREFIX: &str = "tm-";

/// Longest id accepted from a mirror file.
const MAX_ID_LEN: usize = 64;

/// Generate a unique ID from content + entropy.
/// Format: "tm-" + 10 hex chars of SHA256(title + timestamp + random)
pub fn generate_id(title: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(created_at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    // Two tasks with one title in the same second must still differ
    hasher.update(rand::rng().random::<[u8; 8]>());
    let hash = hasher.finalize();
    // 10 hex chars = 40 bits = ~1 trillion values
    format!(
        "{}{:010x}",
        ID_PREFIX,
        u64::from_be_bytes([hash[0], hash[1], hash[2], hash[3], hash[4], 0, 0, 0]) >> 24
    )
}

/// Ids from other machines are opaque; only their alphabet is checked.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
