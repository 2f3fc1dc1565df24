//! Storage Engine
//!
//! Owns the cache store, file store and event bus for one substrate and
//! exposes the operations consumers use. Nothing here returns an error:
//! failures come back as `false`, `None` or a `{success, error}` result.
//!
//! The engine is constructed explicitly; share it through `EngineHandle`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backup::{Backup, BackupSettings, BACKUP_VERSION};
use crate::cache::{
    current_timestamp_ms, CacheEntry, CacheSettings, CacheSettingsUpdate, CacheStats, CacheStore,
    CleanupOutcome, Compressor, PendingCompression,
};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::events::{EventBus, EventDetails, EventKind, ListenerId, QuotaContext, StorageEvent};
use crate::files::{FileStore, FileStoreSettings, FileStoreSettingsUpdate, StoredFile};
use crate::metrics::StorageMetrics;
use crate::models::{OperationResult, OptimizeReport, StoreFileResult};
use crate::substrate::{load_collection, Substrate, METRICS_KEY};

// == Storage Engine ==
#[derive(Debug)]
pub struct StorageEngine {
    substrate: Arc<dyn Substrate>,
    cache: CacheStore,
    files: FileStore,
    events: EventBus,
    compressor: Compressor,
    /// Byte ceiling for cache and files together
    total_quota: usize,
    last_cleanup: Option<u64>,
    /// Publishes cache settings to the optimizer timer
    settings_tx: watch::Sender<CacheSettings>,
}

impl StorageEngine {
    // == Constructor ==
    /// Opens an engine over `substrate`, loading whatever state it holds.
    ///
    /// Settings already stored take precedence over those in `config`.
    pub fn open(substrate: Arc<dyn Substrate>, config: &Config) -> Self {
        let events = EventBus::new();
        let compressor = Compressor::new(config.compression_level);
        let cache = CacheStore::load(
            substrate.clone(),
            events.clone(),
            compressor,
            config.cache_settings(),
        );
        let files = FileStore::load(substrate.clone(), config.file_settings());
        let last_cleanup = load_collection::<StorageMetrics>(substrate.as_ref(), METRICS_KEY)
            .and_then(|hint| hint.last_cleanup);
        let (settings_tx, _) = watch::channel(cache.settings().clone());

        info!(
            "Storage engine opened on {} substrate: {} entries, {} files, quota {} bytes",
            substrate.name(),
            cache.len(),
            files.len(),
            config.total_quota
        );

        Self {
            substrate,
            cache,
            files,
            events,
            compressor,
            total_quota: config.total_quota,
            last_cleanup,
            settings_tx,
        }
    }

    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    /// Receives every cache settings change that affects the optimizer timer.
    pub fn subscribe_settings(&self) -> watch::Receiver<CacheSettings> {
        self.settings_tx.subscribe()
    }

    // == Events ==
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.events.unsubscribe(kind, id)
    }

    // == Set ==
    /// Stores `value` under `key`, compressing it when large.
    ///
    /// If the write would exceed the quota, the oldest half of the cache is
    /// evicted and the write retried once. Returns false if the value cannot
    /// be serialized or still does not fit.
    pub fn set<V: Serialize + ?Sized>(&mut self, key: &str, value: &V, ttl: Option<Duration>) -> bool {
        self.write_entry(key, value, ttl, true)
    }

    /// Like `set` but always stores the plain form; compression is left to
    /// a background task (see `pending_compression`).
    pub fn set_uncompressed<V: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> bool {
        self.write_entry(key, value, ttl, false)
    }

    fn write_entry<V: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
        compress: bool,
    ) -> bool {
        let ttl_ms = ttl.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let entry = match self.cache.prepare(key, value, ttl_ms, compress) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to serialize value for '{}': {}", key, e);
                return false;
            }
        };

        let context = QuotaContext {
            operation: "cache-set",
            target: key.to_string(),
            attempted_bytes: entry.size,
        };
        match self.with_quota_retry(context, |engine| engine.commit_entry(entry.clone())) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache set '{}' failed: {}", key, e);
                false
            }
        }
    }

    fn commit_entry(&mut self, entry: CacheEntry) -> Result<()> {
        let projected = self.cache.usage() - self.cache.entry_size(&entry.key)
            + entry.size
            + self.files.usage();
        if projected > self.total_quota {
            return Err(StoreError::QuotaExceeded(format!(
                "writing '{}' needs {} bytes, quota is {}",
                entry.key, projected, self.total_quota
            )));
        }
        self.cache.insert(entry)
    }

    // == Get ==
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        self.cache.get(key)
    }

    pub fn has(&mut self, key: &str) -> bool {
        self.cache.has(key)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.cache.delete(key)
    }

    // == Clear ==
    /// Removes every cache entry, in memory and on the substrate.
    pub fn clear(&mut self) {
        match self.cache.clear() {
            Ok(()) => info!("Cache cleared"),
            Err(e) => warn!("Failed to clear cache: {}", e),
        }
    }

    pub fn keys(&mut self) -> Vec<String> {
        self.cache.keys()
    }

    /// Runs a cleanup pass, then returns the entry count.
    ///
    /// If the pass cannot be persisted, only the entries it would have kept
    /// are counted.
    pub fn size(&mut self) -> usize {
        match self.cache.cleanup() {
            Ok(_) => {
                self.last_cleanup = Some(current_timestamp_ms());
                self.cache.len()
            }
            Err(e) => {
                warn!("Cleanup pass could not be persisted: {}", e);
                self.cache.live_len()
            }
        }
    }

    // == Cleanup ==
    /// Removes expired entries, then trims to `maxEntries`, oldest first.
    pub fn cleanup(&mut self) -> CleanupOutcome {
        match self.cache.cleanup() {
            Ok(outcome) => {
                self.last_cleanup = Some(current_timestamp_ms());
                outcome
            }
            Err(e) => {
                warn!("Cleanup pass could not be persisted: {}", e);
                CleanupOutcome::default()
            }
        }
    }

    // == Settings ==
    pub fn cache_settings(&self) -> &CacheSettings {
        self.cache.settings()
    }

    pub fn update_cache_settings(&mut self, update: CacheSettingsUpdate) -> OperationResult {
        let next = match self.cache.settings().with_update(&update) {
            Ok(next) => next,
            Err(e) => return OperationResult::failed(e.to_string()),
        };
        let timer_changed = self.cache.settings().timer_differs(&next);

        if let Err(e) = self.cache.update_settings(next.clone()) {
            warn!("Failed to save cache settings: {}", e);
            return OperationResult::failed(e.to_string());
        }

        if timer_changed {
            debug!("Cleanup timer settings changed");
            self.settings_tx.send_replace(next);
        }
        OperationResult::ok()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats().clone()
    }

    // == Files ==
    /// Validates and stores an uploaded file.
    ///
    /// Cache entries are evicted to make room when the combined quota would
    /// be exceeded; files themselves are never evicted.
    pub fn store_file(&mut self, name: &str, mime_type: &str, bytes: &[u8]) -> StoreFileResult {
        let file = match self.files.prepare(name, mime_type, bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!("Rejected file '{}': {}", name, e);
                return StoreFileResult::rejected(e.to_string());
            }
        };

        let id = file.id.clone();
        let context = QuotaContext {
            operation: "file-store",
            target: name.to_string(),
            attempted_bytes: file.payload.len(),
        };
        match self.with_quota_retry(context, |engine| engine.commit_file(file.clone())) {
            Ok(()) => StoreFileResult::stored(id),
            Err(e) => {
                warn!("Failed to store file '{}': {}", name, e);
                StoreFileResult::rejected(e.to_string())
            }
        }
    }

    fn commit_file(&mut self, file: StoredFile) -> Result<()> {
        let projected = self.cache.usage() + self.files.usage() + file.payload.len();
        if projected > self.total_quota {
            return Err(StoreError::QuotaExceeded(format!(
                "storing '{}' needs {} bytes, quota is {}",
                file.name, projected, self.total_quota
            )));
        }
        self.files.insert(file)
    }

    pub fn get_file(&self, id: &str) -> Option<StoredFile> {
        self.files.get(id).cloned()
    }

    pub fn get_all_files(&self) -> Vec<StoredFile> {
        self.files.snapshot()
    }

    pub fn delete_file(&mut self, id: &str) -> bool {
        match self.files.delete(id) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("Failed to delete file {}: {}", id, e);
                false
            }
        }
    }

    /// Writes the decoded file into `download_dir`. Returns the written path.
    pub fn export_file(&self, id: &str, download_dir: impl AsRef<Path>) -> Option<PathBuf> {
        match self.files.export(id, download_dir.as_ref()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to export file {}: {}", id, e);
                None
            }
        }
    }

    pub fn file_settings(&self) -> &FileStoreSettings {
        self.files.settings()
    }

    pub fn update_file_settings(&mut self, update: FileStoreSettingsUpdate) -> OperationResult {
        let result = self
            .files
            .settings()
            .with_update(&update)
            .and_then(|next| self.files.update_settings(next));
        OperationResult::from(result)
    }

    // == Metrics ==
    /// Recomputes metrics from live state and saves them as a hint.
    pub fn metrics(&self) -> StorageMetrics {
        let metrics = StorageMetrics::compute(&self.cache, &self.files, self.last_cleanup);
        match serde_json::to_string(&metrics) {
            Ok(serialized) => {
                if let Err(e) = self.substrate.set(METRICS_KEY, &serialized) {
                    debug!("Metrics hint not saved: {}", e);
                }
            }
            Err(e) => debug!("Metrics hint not serialized: {}", e),
        }
        metrics
    }

    // == Optimize ==
    /// Runs a cleanup pass followed by a compression sweep.
    pub fn optimize(&mut self) -> OptimizeReport {
        let before = self.metrics();
        let mut improvements = Vec::new();

        let outcome = self.cleanup();
        if outcome.expired > 0 {
            improvements.push(format!("Removed {} expired entries", outcome.expired));
        }
        if outcome.trimmed > 0 {
            improvements.push(format!(
                "Removed {} oldest entries to stay within {} entries",
                outcome.trimmed,
                self.cache.settings().max_entries
            ));
        }

        match self.cache.compress_sweep() {
            Ok(sweep) if sweep.compressed > 0 => improvements.push(format!(
                "Compressed {} entries, saving {} bytes",
                sweep.compressed, sweep.bytes_saved
            )),
            Ok(_) => {}
            Err(e) => warn!("Compression sweep could not be persisted: {}", e),
        }

        let after = self.metrics();
        if improvements.is_empty() {
            debug!("Optimize: nothing to do");
        } else {
            info!(
                "Optimize: {} ({} -> {} bytes)",
                improvements.join("; "),
                before.total_size,
                after.total_size
            );
        }

        OptimizeReport {
            before,
            after,
            improvements,
        }
    }

    // == Deferred Compression ==
    pub fn pending_compression(&self, key: &str) -> Option<PendingCompression> {
        self.cache.pending_compression(key)
    }

    /// Applies a background compression result if the entry is unchanged.
    pub fn merge_compressed(&mut self, pending: &PendingCompression, stored: String) -> bool {
        match self.cache.merge_compressed(pending, stored) {
            Ok(merged) => {
                if merged {
                    debug!("Merged deferred compression of '{}'", pending.key);
                } else {
                    debug!("Discarded stale compression of '{}'", pending.key);
                }
                merged
            }
            Err(e) => {
                warn!("Deferred compression of '{}' not persisted: {}", pending.key, e);
                false
            }
        }
    }

    // == Backup ==
    /// Takes a point-in-time copy of all persisted state.
    pub fn create_backup(&self) -> Backup {
        Backup {
            version: BACKUP_VERSION.to_string(),
            timestamp: current_timestamp_ms(),
            files: self.files.snapshot(),
            cache: self.cache.snapshot(),
            settings: BackupSettings {
                local_storage: self.files.settings().clone(),
                cache: self.cache.settings().clone(),
            },
            metrics: self.metrics(),
        }
    }

    // == Restore ==
    /// Replaces cache entries, files and settings with those in `backup`.
    ///
    /// The snapshot is validated first; on any failure nothing is changed.
    pub fn restore_from_backup(&mut self, backup: &Backup) -> OperationResult {
        if let Err(e) = backup.validate(self.total_quota) {
            warn!("Backup rejected: {}", e);
            return OperationResult::failed(e.to_string());
        }

        let previous_entries = self.cache.snapshot();
        let previous_settings = self.cache.settings().clone();

        if let Err(e) = self
            .cache
            .replace_all(backup.cache.clone(), backup.settings.cache.clone())
        {
            warn!("Restore failed while writing cache: {}", e);
            return OperationResult::failed(e.to_string());
        }

        if let Err(e) = self
            .files
            .replace_all(backup.files.clone(), backup.settings.local_storage.clone())
        {
            warn!("Restore failed while writing files: {}", e);
            if let Err(rollback) = self.cache.replace_all(previous_entries, previous_settings) {
                warn!("Failed to roll back cache after restore failure: {}", rollback);
            }
            return OperationResult::failed(e.to_string());
        }

        if previous_settings.timer_differs(self.cache.settings()) {
            self.settings_tx.send_replace(self.cache.settings().clone());
        }

        info!(
            "Restored backup from {}: {} entries, {} files",
            backup.timestamp,
            backup.cache.len(),
            backup.files.len()
        );
        OperationResult::ok()
    }

    /// Parses and restores a user-supplied snapshot file's contents.
    pub fn restore_from_json(&mut self, json: &str) -> OperationResult {
        match Backup::from_json(json) {
            Ok(backup) => self.restore_from_backup(&backup),
            Err(e) => {
                warn!("Backup rejected: {}", e);
                OperationResult::failed(e.to_string())
            }
        }
    }

    // == Quota Handling ==
    fn with_quota_retry<F>(&mut self, context: QuotaContext, mut attempt: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        match attempt(self) {
            Err(e) if e.is_quota() => {
                warn!("{} '{}' hit the quota: {}", context.operation, context.target, e);
                self.emergency_evict(context);
                attempt(self)
            }
            other => other,
        }
    }

    /// Removes the oldest half of the cache and reports it.
    fn emergency_evict(&mut self, context: QuotaContext) -> usize {
        let removed = match self.cache.evict_oldest_half() {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Emergency eviction could not be persisted: {}", e);
                0
            }
        };
        warn!("Emergency eviction removed {} cache entries", removed);
        self.events.emit(EventDetails::QuotaExceeded {
            removed_entries: removed,
            context,
        });
        removed
    }
}
