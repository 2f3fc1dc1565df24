//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

// == Cache Entry ==
/// A single cache entry as held in memory and persisted under `ffm:cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Unique key
    pub key: String,
    /// Stored value; a base64 string of zstd bytes when `compressed`
    pub data: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Time to live in milliseconds
    pub ttl: u64,
    /// Whether `data` holds the compressed form
    pub compressed: bool,
    /// Byte length of the stored representation
    pub size: usize,
    /// Identifies one specific write; not persisted
    #[serde(skip)]
    pub(crate) revision: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an uncompressed entry stamped with the current time.
    ///
    /// # Arguments
    /// * `key` - The entry key
    /// * `data` - The value as JSON
    /// * `size` - Byte length of the serialized value
    /// * `ttl_ms` - Time to live in milliseconds
    pub fn new(key: String, data: Value, size: usize, ttl_ms: u64) -> Self {
        Self {
            key,
            data,
            created_at: current_timestamp_ms(),
            ttl: ttl_ms,
            compressed: false,
            size,
            revision: 0,
        }
    }

    // == Is Expired ==
    /// Checks whether the entry has expired at `now` (Unix milliseconds).
    ///
    /// The entry is visible only while `now - created_at < ttl`, so it is
    /// expired from the instant the full TTL has elapsed.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) >= self.ttl
    }

    // == Stored Size ==
    /// Measures the byte length of the stored representation.
    ///
    /// This is the serialized JSON for plain entries and the encoded string
    /// for compressed ones, the same figure `size` records at write time.
    pub fn stored_size(&self) -> Result<usize> {
        if self.compressed {
            self.data.as_str().map(str::len).ok_or_else(|| StoreError::Corrupt {
                key: self.key.clone(),
                reason: "compressed entry does not hold a string".into(),
            })
        } else {
            Ok(serde_json::to_string(&self.data)?.len())
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
