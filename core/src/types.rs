//! Shared primitive types used across the detection core.

use chrono::{DateTime, Utc};

/// Wall-clock instant attached to every record and event.
pub type Timestamp = DateTime<Utc>;

/// A client network address as it appears in the log (usually an IP).
pub type SourceAddr = String;

/// A stable user identifier.
pub type UserId = String;

/// Stable shard index for a key. Same key, same shard, every run.
pub fn shard_of(key: &str, shards: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}
