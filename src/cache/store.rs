//! Cache Store Module
//!
//! TTL-bounded key-value cache persisted as a single array under
//! `ffm:cache`. Every mutation is written through to the substrate before it
//! is considered done; if the substrate rejects the write, the in-memory
//! change is rolled back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{
    current_timestamp_ms, CacheEntry, CacheSettings, CacheStats, Compressor, CreationOrder,
};
use crate::error::{Result, StoreError};
use crate::events::{EventBus, EventDetails, MissReason};
use crate::substrate::{load_collection, Substrate, CACHE_KEY, CACHE_SETTINGS_KEY};

/// Entries removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    /// Removed because their TTL elapsed
    pub expired: usize,
    /// Removed to get back down to `maxEntries`
    pub trimmed: usize,
}

/// Entries converted by one compression sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub compressed: usize,
    pub bytes_saved: usize,
}

/// A write whose compression was deferred to a background task.
#[derive(Debug, Clone)]
pub struct PendingCompression {
    pub key: String,
    pub revision: u64,
    pub serialized: String,
}

// == Cache Store ==
#[derive(Debug)]
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Creation order, oldest first
    order: CreationOrder,
    /// Lifetime counters
    stats: CacheStats,
    settings: CacheSettings,
    compressor: Compressor,
    substrate: Arc<dyn Substrate>,
    events: EventBus,
    next_revision: u64,
}

impl CacheStore {
    // == Constructor ==
    /// Loads settings and entries from the substrate.
    ///
    /// Missing or corrupt collections start empty; `defaults` is used when
    /// no valid settings are stored.
    pub fn load(
        substrate: Arc<dyn Substrate>,
        events: EventBus,
        compressor: Compressor,
        defaults: CacheSettings,
    ) -> Self {
        let settings = match load_collection::<CacheSettings>(substrate.as_ref(), CACHE_SETTINGS_KEY)
        {
            Some(stored) if stored.validate().is_ok() => stored,
            Some(_) => {
                warn!("Stored cache settings are invalid, using defaults");
                defaults
            }
            None => defaults,
        };

        let mut store = Self {
            entries: HashMap::new(),
            order: CreationOrder::new(),
            stats: CacheStats::new(),
            settings,
            compressor,
            substrate,
            events,
            next_revision: 0,
        };

        let stored: Vec<CacheEntry> =
            load_collection(store.substrate.as_ref(), CACHE_KEY).unwrap_or_default();
        store.install(stored);

        debug!(
            "Cache store loaded {} entries from {} substrate",
            store.entries.len(),
            store.substrate.name()
        );
        store
    }

    /// Replaces in-memory contents, ordering by creation time. Recorded
    /// sizes are re-measured from the stored data.
    fn install(&mut self, mut entries: Vec<CacheEntry>) {
        entries.sort_by_key(|e| e.created_at);
        self.entries.clear();
        self.order.clear();
        for mut entry in entries {
            match entry.stored_size() {
                Ok(measured) if measured != entry.size => {
                    debug!(
                        "Entry '{}' recorded {} bytes, holds {}",
                        entry.key, entry.size, measured
                    );
                    entry.size = measured;
                }
                Ok(_) => {}
                Err(e) => warn!("Cannot measure entry '{}': {}", entry.key, e),
            }
            entry.revision = self.bump_revision();
            self.order.push_newest(&entry.key);
            self.entries.insert(entry.key.clone(), entry);
        }
    }

    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    // == Accessors ==
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes used by all stored entries.
    pub fn usage(&self) -> usize {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Bytes used by the entry under `key`, 0 if absent.
    pub fn entry_size(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |e| e.size)
    }

    pub fn compressed_count(&self) -> usize {
        self.entries.values().filter(|e| e.compressed).count()
    }

    /// Raw entry access, without expiry checks or events.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Update Settings ==
    /// Validates and persists new settings.
    pub fn update_settings(&mut self, next: CacheSettings) -> Result<()> {
        next.validate()?;
        self.substrate
            .set(CACHE_SETTINGS_KEY, &serde_json::to_string(&next)?)?;
        self.settings = next;
        Ok(())
    }

    // == Prepare ==
    /// Builds the entry `set` would store, without touching the store.
    ///
    /// When `compress` is set and the serialized value exceeds the
    /// compression threshold, the compressed form is used if it is smaller.
    /// Compression failures fall back to the plain form.
    pub fn prepare<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl_ms: Option<u64>,
        compress: bool,
    ) -> Result<CacheEntry> {
        let data = serde_json::to_value(value)?;
        let serialized = serde_json::to_string(&data)?;
        let ttl = ttl_ms.unwrap_or(self.settings.default_ttl);
        let mut entry = CacheEntry::new(key.to_string(), data, serialized.len(), ttl);

        if compress && serialized.len() > self.settings.compression_threshold {
            if let Some(stored) = self.compressor.compress_if_smaller(&serialized) {
                entry.size = stored.len();
                entry.data = Value::String(stored);
                entry.compressed = true;
            }
        }
        Ok(entry)
    }

    // == Insert ==
    /// Stores a prepared entry, overwriting any entry with the same key.
    pub fn insert(&mut self, mut entry: CacheEntry) -> Result<()> {
        entry.revision = self.bump_revision();
        let key = entry.key.clone();
        let (size, compressed) = (entry.size, entry.compressed);

        let previous_order = self.order.clone();
        let previous = self.entries.insert(key.clone(), entry);
        self.order.push_newest(&key);

        if let Err(e) = self.persist() {
            match previous {
                Some(old) => {
                    self.entries.insert(key, old);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
            self.order = previous_order;
            return Err(e);
        }

        debug!("Cache set '{}' ({} bytes, compressed={})", key, size, compressed);
        self.events.emit(EventDetails::CacheSet {
            key,
            size,
            compressed,
        });
        Ok(())
    }

    // == Get ==
    /// Retrieves and decodes the value under `key`.
    ///
    /// Expired entries are removed and reported as misses.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired_at(current_timestamp_ms()),
            None => {
                self.record_miss(key, MissReason::Absent);
                return None;
            }
        };

        if expired {
            self.expire(&[key.to_string()]);
            self.record_miss(key, MissReason::Expired);
            return None;
        }

        let decoded = match self.entries.get(key) {
            Some(entry) => self.decode::<T>(entry),
            None => return None,
        };

        match decoded {
            Ok(value) => {
                self.stats.record_hit();
                self.events.emit(EventDetails::CacheHit {
                    key: key.to_string(),
                });
                Some(value)
            }
            Err(e) => {
                warn!("Failed to decode cache entry '{}': {}", key, e);
                self.record_miss(key, MissReason::Undecodable);
                None
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, entry: &CacheEntry) -> Result<T> {
        if entry.compressed {
            let stored = entry.data.as_str().ok_or_else(|| {
                StoreError::Compression("compressed entry does not hold a string".into())
            })?;
            let serialized = self.compressor.decompress(stored)?;
            Ok(serde_json::from_str(&serialized)?)
        } else {
            Ok(T::deserialize(&entry.data)?)
        }
    }

    fn record_miss(&mut self, key: &str, reason: MissReason) {
        self.stats.record_miss();
        self.events.emit(EventDetails::CacheMiss {
            key: key.to_string(),
            reason,
        });
    }

    // == Has ==
    /// True if a live entry exists. Emits no events; expired entries are removed.
    pub fn has(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired_at(current_timestamp_ms()) => {
                self.expire(&[key.to_string()]);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    // == Delete ==
    /// Removes an entry. Returns false if absent or the removal could not be persisted.
    pub fn delete(&mut self, key: &str) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }

        match self.remove_keys(&[key.to_string()]) {
            Ok(_) => {
                debug!("Cache delete '{}'", key);
                self.events.emit(EventDetails::CacheDelete {
                    key: key.to_string(),
                });
                true
            }
            Err(e) => {
                warn!("Failed to persist delete of '{}': {}", key, e);
                false
            }
        }
    }

    // == Clear ==
    /// Removes every entry and erases the durable collection.
    pub fn clear(&mut self) -> Result<()> {
        self.substrate.remove(CACHE_KEY)?;
        self.entries.clear();
        self.order.clear();
        Ok(())
    }

    // == Keys ==
    /// Live keys, oldest first. Expired entries are removed on the way.
    pub fn keys(&mut self) -> Vec<String> {
        let now = current_timestamp_ms();
        let expired: Vec<String> = self
            .order
            .iter()
            .filter(|k| self.entries.get(*k).is_some_and(|e| e.is_expired_at(now)))
            .cloned()
            .collect();
        self.expire(&expired);

        // Expired keys survive a failed removal; never hand them out
        self.order
            .iter()
            .filter(|k| self.entries.get(*k).is_some_and(|e| !e.is_expired_at(now)))
            .cloned()
            .collect()
    }

    /// Entries a successful cleanup pass would keep: unexpired, capped at
    /// `maxEntries`.
    pub fn live_len(&self) -> usize {
        let now = current_timestamp_ms();
        let unexpired = self
            .entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count();
        unexpired.min(self.settings.max_entries)
    }

    fn expire(&mut self, keys: &[String]) {
        match self.remove_keys(keys) {
            Ok(removed) => self.stats.record_expirations(removed),
            Err(e) => warn!("Failed to persist removal of expired entries: {}", e),
        }
    }

    // == Cleanup ==
    /// Removes expired entries, then the oldest entries beyond `maxEntries`.
    pub fn cleanup(&mut self) -> Result<CleanupOutcome> {
        let now = current_timestamp_ms();

        let expired: HashSet<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired_at(now))
            .map(|e| e.key.clone())
            .collect();

        let remaining = self.entries.len() - expired.len();
        let excess = remaining.saturating_sub(self.settings.max_entries);
        let mut doomed: Vec<String> = self
            .order
            .iter()
            .filter(|k| !expired.contains(*k))
            .take(excess)
            .cloned()
            .collect();

        let outcome = CleanupOutcome {
            expired: expired.len(),
            trimmed: doomed.len(),
        };
        doomed.extend(expired);

        self.remove_keys(&doomed)?;
        self.stats.record_expirations(outcome.expired);
        self.stats.record_evictions(outcome.trimmed);

        if outcome.expired + outcome.trimmed > 0 {
            info!(
                "Cache cleanup: removed {} expired and {} excess entries",
                outcome.expired, outcome.trimmed
            );
        } else {
            debug!("Cache cleanup: nothing to remove");
        }

        self.events.emit(EventDetails::Cleanup {
            expired: outcome.expired,
            trimmed: outcome.trimmed,
        });
        Ok(outcome)
    }

    // == Evict Oldest Half ==
    /// Removes the oldest half (rounded down) of all entries.
    pub fn evict_oldest_half(&mut self) -> Result<usize> {
        let doomed = self.order.oldest(self.entries.len() / 2);
        let removed = self.remove_keys(&doomed)?;
        self.stats.record_evictions(removed);
        Ok(removed)
    }

    // == Compression Sweep ==
    /// Compresses every uncompressed entry above the threshold, in place.
    pub fn compress_sweep(&mut self) -> Result<SweepOutcome> {
        let threshold = self.settings.compression_threshold;
        let candidates: Vec<String> = self
            .order
            .iter()
            .filter(|k| {
                self.entries
                    .get(*k)
                    .is_some_and(|e| !e.compressed && e.size > threshold)
            })
            .cloned()
            .collect();

        let mut originals: Vec<CacheEntry> = Vec::new();
        let mut outcome = SweepOutcome::default();

        for key in candidates {
            let serialized = match self.entries.get(&key).map(|e| serde_json::to_string(&e.data)) {
                Some(Ok(serialized)) => serialized,
                Some(Err(e)) => {
                    warn!("Failed to serialize '{}' for compression: {}", key, e);
                    continue;
                }
                None => continue,
            };
            let Some(stored) = self.compressor.compress_if_smaller(&serialized) else {
                continue;
            };

            let revision = self.bump_revision();
            if let Some(entry) = self.entries.get_mut(&key) {
                originals.push(entry.clone());
                outcome.bytes_saved += entry.size.saturating_sub(stored.len());
                outcome.compressed += 1;
                entry.size = stored.len();
                entry.data = Value::String(stored);
                entry.compressed = true;
                entry.revision = revision;
            }
        }

        if outcome.compressed == 0 {
            return Ok(outcome);
        }

        if let Err(e) = self.persist() {
            for original in originals {
                self.entries.insert(original.key.clone(), original);
            }
            return Err(e);
        }
        Ok(outcome)
    }

    // == Deferred Compression ==
    /// Describes the compression work a background task should do for `key`.
    pub fn pending_compression(&self, key: &str) -> Option<PendingCompression> {
        let entry = self.entries.get(key)?;
        if entry.compressed || entry.size <= self.settings.compression_threshold {
            return None;
        }
        let serialized = serde_json::to_string(&entry.data).ok()?;
        Some(PendingCompression {
            key: key.to_string(),
            revision: entry.revision,
            serialized,
        })
    }

    /// Applies a background compression result.
    ///
    /// Returns false without changes if the entry was deleted or rewritten
    /// since the work was handed out, or if the result is not smaller.
    pub fn merge_compressed(&mut self, pending: &PendingCompression, stored: String) -> Result<bool> {
        let original = match self.entries.get(&pending.key) {
            Some(entry)
                if entry.revision == pending.revision
                    && !entry.compressed
                    && stored.len() < entry.size =>
            {
                entry.clone()
            }
            _ => return Ok(false),
        };

        let revision = self.bump_revision();
        if let Some(entry) = self.entries.get_mut(&pending.key) {
            entry.size = stored.len();
            entry.data = Value::String(stored);
            entry.compressed = true;
            entry.revision = revision;
        }

        if let Err(e) = self.persist() {
            self.entries.insert(original.key.clone(), original);
            return Err(e);
        }
        Ok(true)
    }

    // == Snapshot ==
    /// Copies every entry, oldest first.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .cloned()
            .collect()
    }

    // == Replace All ==
    /// Swaps in a complete set of entries and settings, persisting both.
    ///
    /// On failure the previous entries are restored in memory and on a
    /// best-effort basis in the substrate.
    pub fn replace_all(&mut self, entries: Vec<CacheEntry>, settings: CacheSettings) -> Result<()> {
        settings.validate()?;
        let previous_entries = self.snapshot();
        let previous_settings = self.settings.clone();

        self.substrate
            .set(CACHE_SETTINGS_KEY, &serde_json::to_string(&settings)?)?;

        self.install(entries);
        if let Err(e) = self.persist() {
            self.install(previous_entries);
            match serde_json::to_string(&previous_settings) {
                Ok(serialized) => {
                    if let Err(restore_err) = self.substrate.set(CACHE_SETTINGS_KEY, &serialized) {
                        warn!("Failed to restore previous cache settings: {}", restore_err);
                    }
                }
                Err(ser_err) => warn!("Failed to serialize previous cache settings: {}", ser_err),
            }
            return Err(e);
        }

        self.settings = settings;
        Ok(())
    }

    // == Internal ==
    fn remove_keys(&mut self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let previous_order = self.order.clone();
        let mut removed = Vec::new();
        for key in keys {
            if let Some(entry) = self.entries.remove(key) {
                self.order.remove(key);
                removed.push(entry);
            }
        }

        if removed.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.persist() {
            for entry in removed {
                self.entries.insert(entry.key.clone(), entry);
            }
            self.order = previous_order;
            return Err(e);
        }
        Ok(removed.len())
    }

    fn persist(&self) -> Result<()> {
        let ordered: Vec<&CacheEntry> = self
            .order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .collect();
        let serialized = serde_json::to_string(&ordered)?;
        self.substrate.set(CACHE_KEY, &serialized)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{MemorySubstrate, SwitchableSubstrate};
    use serde_json::json;
    use std::thread::sleep;
    use std::time::Duration;

    fn new_store(substrate: Arc<dyn Substrate>) -> CacheStore {
        CacheStore::load(
            substrate,
            EventBus::new(),
            Compressor::default(),
            CacheSettings::default(),
        )
    }

    fn set<V: Serialize>(store: &mut CacheStore, key: &str, value: V, ttl: Option<u64>) {
        let entry = store.prepare(key, &value, ttl, true).unwrap();
        store.insert(entry).unwrap();
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        set(&mut store, "key1", json!({"name": "report.pdf", "pages": 3}), None);

        let value: Value = store.get("key1").unwrap();
        assert_eq!(value, json!({"name": "report.pdf", "pages": 3}));
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        assert!(store.get::<String>("nonexistent").is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        set(&mut store, "key1", "value1", None);
        set(&mut store, "key1", "value2", None);

        assert_eq!(store.get::<String>("key1").as_deref(), Some("value2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        set(&mut store, "a", "v", Some(100));
        assert!(store.has("a"));

        sleep(Duration::from_millis(150));

        assert!(store.get::<String>("a").is_none());
        assert!(!store.has("a"));
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_store_delete() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        set(&mut store, "key1", 1, None);

        assert!(store.delete("key1"));
        assert!(!store.delete("key1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_persists_and_reloads() {
        let substrate: Arc<dyn Substrate> = Arc::new(MemorySubstrate::new());
        let mut store = new_store(substrate.clone());
        set(&mut store, "first", 1, None);
        set(&mut store, "second", 2, None);

        let mut reloaded = new_store(substrate);
        assert_eq!(reloaded.keys(), vec!["first", "second"]);
        assert_eq!(reloaded.get::<i32>("second"), Some(2));
    }

    #[test]
    fn test_store_corrupt_collection_starts_empty() {
        let substrate: Arc<dyn Substrate> = Arc::new(MemorySubstrate::new());
        substrate.set(CACHE_KEY, "[{\"broken\"").unwrap();
        substrate.set(CACHE_SETTINGS_KEY, "{\"maxEntries\":0").unwrap();

        let store = new_store(substrate);
        assert!(store.is_empty());
        assert_eq!(store.settings(), &CacheSettings::default());
    }

    #[test]
    fn test_store_compresses_large_values() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        let big = "x".repeat(15_000);
        set(&mut store, "big", &big, None);

        let entry = store.entry("big").unwrap();
        assert!(entry.compressed);
        assert!(entry.size < 15_000);
        assert_eq!(store.get::<String>("big"), Some(big));
    }

    #[test]
    fn test_store_small_values_uncompressed() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        set(&mut store, "small", "tiny", None);
        assert!(!store.entry("small").unwrap().compressed);
    }

    #[test]
    fn test_store_cleanup_trims_oldest() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        store
            .update_settings(CacheSettings {
                max_entries: 3,
                ..CacheSettings::default()
            })
            .unwrap();

        for i in 0..5 {
            set(&mut store, &format!("key{}", i), i, None);
        }
        // Not enforced on set
        assert_eq!(store.len(), 5);

        let outcome = store.cleanup().unwrap();
        assert_eq!(outcome, CleanupOutcome { expired: 0, trimmed: 2 });
        assert_eq!(store.keys(), vec!["key2", "key3", "key4"]);
    }

    #[test]
    fn test_store_cleanup_expired_first() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        store
            .update_settings(CacheSettings {
                max_entries: 2,
                ..CacheSettings::default()
            })
            .unwrap();

        set(&mut store, "old", 0, None);
        set(&mut store, "short", 1, Some(50));
        set(&mut store, "new", 2, None);
        sleep(Duration::from_millis(80));

        let outcome = store.cleanup().unwrap();
        assert_eq!(outcome, CleanupOutcome { expired: 1, trimmed: 0 });
        assert_eq!(store.keys(), vec!["old", "new"]);
    }

    #[test]
    fn test_store_evict_oldest_half() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        for i in 0..5 {
            set(&mut store, &format!("key{}", i), i, None);
        }

        assert_eq!(store.evict_oldest_half().unwrap(), 2);
        assert_eq!(store.keys(), vec!["key2", "key3", "key4"]);
        assert_eq!(store.stats().evictions, 2);
    }

    #[test]
    fn test_store_rolls_back_rejected_write() {
        let substrate: Arc<dyn Substrate> = Arc::new(MemorySubstrate::with_capacity(200));
        let mut store = new_store(substrate);
        set(&mut store, "fits", "small", None);

        let entry = store.prepare("huge", &"y".repeat(500), None, false).unwrap();
        let result = store.insert(entry);

        assert!(matches!(result, Err(StoreError::QuotaExceeded(_))));
        assert_eq!(store.keys(), vec!["fits"]);
        assert!(!store.has("huge"));
    }

    #[test]
    fn test_store_compress_sweep() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        let big = "z".repeat(20_000);
        let entry = store.prepare("big", &big, None, false).unwrap();
        store.insert(entry).unwrap();
        assert!(!store.entry("big").unwrap().compressed);

        let first = store.compress_sweep().unwrap();
        assert_eq!(first.compressed, 1);
        assert!(first.bytes_saved > 0);

        let second = store.compress_sweep().unwrap();
        assert_eq!(second, SweepOutcome::default());
        assert_eq!(store.get::<String>("big"), Some(big));
    }

    #[test]
    fn test_store_merge_checks_revision() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        let big = "q".repeat(20_000);
        let entry = store.prepare("big", &big, None, false).unwrap();
        store.insert(entry).unwrap();

        let pending = store.pending_compression("big").unwrap();
        let stored = Compressor::default().compress(&pending.serialized).unwrap();

        // Rewritten after the work was handed out: result is discarded
        let entry = store.prepare("big", &big, None, false).unwrap();
        store.insert(entry).unwrap();
        assert!(!store.merge_compressed(&pending, stored).unwrap());
        assert!(!store.entry("big").unwrap().compressed);

        let pending = store.pending_compression("big").unwrap();
        let stored = Compressor::default().compress(&pending.serialized).unwrap();
        assert!(store.merge_compressed(&pending, stored).unwrap());
        assert!(store.entry("big").unwrap().compressed);
        assert_eq!(store.get::<String>("big"), Some(big));
    }

    #[test]
    fn test_store_merge_after_delete_is_noop() {
        let mut store = new_store(Arc::new(MemorySubstrate::new()));
        let entry = store.prepare("big", &"w".repeat(20_000), None, false).unwrap();
        store.insert(entry).unwrap();
        let pending = store.pending_compression("big").unwrap();

        store.delete("big");
        assert!(!store.merge_compressed(&pending, "AAAA".into()).unwrap());
        assert!(!store.has("big"));
    }

    #[test]
    fn test_keys_skip_expired_when_removal_fails() {
        let substrate = Arc::new(SwitchableSubstrate::default());
        let mut store = new_store(substrate.clone());
        set(&mut store, "a", "v", Some(20));
        set(&mut store, "b", "v", None);
        sleep(Duration::from_millis(50));

        substrate.refuse_writes(true);
        assert_eq!(store.keys(), vec!["b"]);
        assert!(!store.has("a"));
        assert!(store.get::<String>("a").is_none());
        assert_eq!(store.live_len(), 1);

        // Removal is retried once writes succeed again
        substrate.refuse_writes(false);
        assert_eq!(store.keys(), vec!["b"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_remeasures_recorded_sizes() {
        let substrate: Arc<dyn Substrate> = Arc::new(MemorySubstrate::new());
        let value = "y".repeat(5000);
        let persisted = json!([{
            "key": "k",
            "data": value,
            "createdAt": current_timestamp_ms(),
            "ttl": 3_600_000,
            "compressed": false,
            "size": 1
        }]);
        substrate.set(CACHE_KEY, &persisted.to_string()).unwrap();

        let mut store = new_store(substrate);
        assert_eq!(store.entry_size("k"), 5002);
        assert_eq!(store.usage(), 5002);
        assert_eq!(store.get::<String>("k"), Some(value));
    }

    #[test]
    fn test_store_clear_erases_durable_copy() {
        let substrate: Arc<dyn Substrate> = Arc::new(MemorySubstrate::new());
        let mut store = new_store(substrate.clone());
        set(&mut store, "k", 1, None);

        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(substrate.get(CACHE_KEY).unwrap().is_none());
    }
}
