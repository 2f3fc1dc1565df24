//! Backup / Restore Module
//!
//! A versioned, self-contained snapshot of the engine's persisted state.
//! Snapshots are validated as a whole before anything is restored.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, CacheSettings};
use crate::error::{Result, StoreError};
use crate::files::{FileStoreSettings, StoredFile};
use crate::metrics::StorageMetrics;

/// Snapshot format written by this version
pub const BACKUP_VERSION: &str = "1.0.0";

/// Major format version this build can restore
const SUPPORTED_MAJOR: u64 = 1;

// == Backup Settings ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    /// File store settings
    #[serde(rename = "localStorage")]
    pub local_storage: FileStoreSettings,
    pub cache: CacheSettings,
}

// == Backup ==
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    /// Semver of the snapshot format
    pub version: String,
    /// Unix milliseconds when the snapshot was taken
    pub timestamp: u64,
    pub files: Vec<StoredFile>,
    pub cache: Vec<CacheEntry>,
    pub settings: BackupSettings,
    #[serde(default)]
    pub metrics: StorageMetrics,
}

impl Backup {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a snapshot, reporting shape problems as `InvalidBackup`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidBackup(e.to_string()))
    }

    // == Validate ==
    /// Checks everything a restore depends on.
    ///
    /// # Arguments
    /// * `total_quota` - Byte budget the restored cache and files must fit in
    pub fn validate(&self, total_quota: usize) -> Result<()> {
        let major = parse_major(&self.version).ok_or_else(|| {
            StoreError::InvalidBackup(format!("malformed version '{}'", self.version))
        })?;
        if major != SUPPORTED_MAJOR {
            return Err(StoreError::InvalidBackup(format!(
                "unsupported version {}",
                self.version
            )));
        }

        self.settings
            .cache
            .validate()
            .and_then(|_| self.settings.local_storage.validate())
            .map_err(|e| StoreError::InvalidBackup(format!("invalid settings: {}", e)))?;

        let mut keys = HashSet::new();
        let mut cache_size = 0;
        for entry in &self.cache {
            if entry.key.is_empty() || !keys.insert(entry.key.as_str()) {
                return Err(StoreError::InvalidBackup(format!(
                    "duplicate or empty cache key '{}'",
                    entry.key
                )));
            }
            if entry.compressed && !entry.data.is_string() {
                return Err(StoreError::InvalidBackup(format!(
                    "compressed entry '{}' has no encoded payload",
                    entry.key
                )));
            }
            let measured = entry
                .stored_size()
                .map_err(|e| StoreError::InvalidBackup(e.to_string()))?;
            if measured != entry.size {
                return Err(StoreError::InvalidBackup(format!(
                    "cache entry '{}' holds {} bytes, recorded as {}",
                    entry.key, measured, entry.size
                )));
            }
            cache_size += measured;
        }

        let mut ids = HashSet::new();
        for file in &self.files {
            if !ids.insert(file.id.as_str()) {
                return Err(StoreError::InvalidBackup(format!("duplicate file id '{}'", file.id)));
            }
            let decoded = file
                .decode()
                .map_err(|e| StoreError::InvalidBackup(e.to_string()))?;
            if decoded.len() != file.size_bytes {
                return Err(StoreError::InvalidBackup(format!(
                    "file '{}' decodes to {} bytes, expected {}",
                    file.id,
                    decoded.len(),
                    file.size_bytes
                )));
            }
        }

        let file_size: usize = self.files.iter().map(|f| f.payload.len()).sum();
        if cache_size + file_size > total_quota {
            return Err(StoreError::InvalidBackup(format!(
                "snapshot needs {} bytes, quota is {}",
                cache_size + file_size,
                total_quota
            )));
        }
        Ok(())
    }
}

/// Major component of a `MAJOR.MINOR.PATCH` version. Pre-release and build
/// suffixes are ignored.
fn parse_major(version: &str) -> Option<u64> {
    let core = version.split(['-', '+']).next().unwrap_or(version);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let numbers: Option<Vec<u64>> = parts.iter().map(|p| p.parse().ok()).collect();
    numbers.map(|n| n[0])
}
