//! Storage Metrics Module
//!
//! Metrics are a projection of the current cache and file store state. The
//! persisted copy under `ffm:metrics` is a hint; only `lastCleanup`, which
//! cannot be recomputed, is read back from it.

use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::files::FileStore;

// == Storage Metrics ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetrics {
    /// Bytes used by cache entries
    pub cache_size: usize,
    /// Bytes used by encoded file payloads
    pub file_size: usize,
    pub total_size: usize,
    pub entry_count: usize,
    /// hits / (hits + misses) for this engine instance
    pub hit_rate: f64,
    /// Fraction of entries stored compressed
    pub compression_ratio: f64,
    /// Unix milliseconds of the last cleanup pass
    pub last_cleanup: Option<u64>,
}

impl StorageMetrics {
    // == Compute ==
    /// Derives metrics from live state.
    pub fn compute(cache: &CacheStore, files: &FileStore, last_cleanup: Option<u64>) -> Self {
        let cache_size = cache.usage();
        let file_size = files.usage();
        let entry_count = cache.len();
        let compression_ratio = if entry_count == 0 {
            0.0
        } else {
            cache.compressed_count() as f64 / entry_count as f64
        };

        Self {
            cache_size,
            file_size,
            total_size: cache_size + file_size,
            entry_count,
            hit_rate: cache.stats().hit_rate(),
            compression_ratio,
            last_cleanup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, Compressor};
    use crate::events::EventBus;
    use crate::files::FileStoreSettings;
    use crate::substrate::{MemorySubstrate, Substrate};
    use std::sync::Arc;

    #[test]
    fn test_empty_metrics() {
        let substrate: Arc<dyn Substrate> = Arc::new(MemorySubstrate::new());
        let cache = CacheStore::load(
            substrate.clone(),
            EventBus::new(),
            Compressor::default(),
            CacheSettings::default(),
        );
        let files = FileStore::load(substrate, FileStoreSettings::default());

        let metrics = StorageMetrics::compute(&cache, &files, None);
        assert_eq!(metrics, StorageMetrics::default());
    }

    #[test]
    fn test_metrics_reflect_state() {
        let substrate: Arc<dyn Substrate> = Arc::new(MemorySubstrate::new());
        let mut cache = CacheStore::load(
            substrate.clone(),
            EventBus::new(),
            Compressor::default(),
            CacheSettings::default(),
        );
        let mut files = FileStore::load(substrate, FileStoreSettings::default());

        let small = cache.prepare("small", "v", None, true).unwrap();
        cache.insert(small).unwrap();
        let big = cache.prepare("big", &"x".repeat(15_000), None, true).unwrap();
        cache.insert(big).unwrap();
        let file = files.prepare("a.txt", "text/plain", b"abc").unwrap();
        files.insert(file).unwrap();

        let _: Option<String> = cache.get("small");
        let _: Option<String> = cache.get("absent");

        let metrics = StorageMetrics::compute(&cache, &files, Some(42));
        assert_eq!(metrics.entry_count, 2);
        assert_eq!(metrics.file_size, 4);
        assert_eq!(metrics.total_size, metrics.cache_size + 4);
        assert_eq!(metrics.hit_rate, 0.5);
        assert_eq!(metrics.compression_ratio, 0.5);
        assert_eq!(metrics.last_cleanup, Some(42));
    }
}
