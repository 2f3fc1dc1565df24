//! Cache Settings Module
//!
//! Process-wide cache tuning, persisted under `ffm:cache-settings`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Default compression threshold in bytes
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 10 * 1024;

// == Cache Settings ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    /// Entry count restored by every cleanup pass
    pub max_entries: usize,
    /// TTL in milliseconds for entries set without one
    #[serde(rename = "defaultTTL")]
    pub default_ttl: u64,
    /// Serialized size in bytes above which values are compressed
    pub compression_threshold: usize,
    /// Whether the periodic optimizer runs
    pub enable_cleanup: bool,
    /// Optimizer period in milliseconds
    pub cleanup_interval: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: 60 * 60 * 1000,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            enable_cleanup: true,
            cleanup_interval: 5 * 60 * 1000,
        }
    }
}

impl CacheSettings {
    // == Validate ==
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(StoreError::Validation("maxEntries must be at least 1".into()));
        }
        if self.default_ttl == 0 {
            return Err(StoreError::Validation("defaultTTL must be positive".into()));
        }
        if self.cleanup_interval == 0 {
            return Err(StoreError::Validation("cleanupInterval must be positive".into()));
        }
        Ok(())
    }

    // == Apply ==
    /// Returns a copy with `update` applied, validated.
    pub fn with_update(&self, update: &CacheSettingsUpdate) -> Result<Self> {
        let next = Self {
            max_entries: update.max_entries.unwrap_or(self.max_entries),
            default_ttl: update.default_ttl.unwrap_or(self.default_ttl),
            compression_threshold: update
                .compression_threshold
                .unwrap_or(self.compression_threshold),
            enable_cleanup: update.enable_cleanup.unwrap_or(self.enable_cleanup),
            cleanup_interval: update.cleanup_interval.unwrap_or(self.cleanup_interval),
        };
        next.validate()?;
        Ok(next)
    }

    /// True when the periodic timer must be recreated to honor `other`.
    pub fn timer_differs(&self, other: &CacheSettings) -> bool {
        self.enable_cleanup != other.enable_cleanup
            || self.cleanup_interval != other.cleanup_interval
    }
}

// == Settings Update ==
/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettingsUpdate {
    pub max_entries: Option<usize>,
    #[serde(rename = "defaultTTL")]
    pub default_ttl: Option<u64>,
    pub compression_threshold: Option<usize>,
    pub enable_cleanup: Option<bool>,
    pub cleanup_interval: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.compression_threshold, 10240);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_update() {
        let settings = CacheSettings::default();
        let update = CacheSettingsUpdate {
            max_entries: Some(3),
            ..Default::default()
        };

        let next = settings.with_update(&update).unwrap();
        assert_eq!(next.max_entries, 3);
        assert_eq!(next.default_ttl, settings.default_ttl);
        assert!(!settings.timer_differs(&next));
    }

    #[test]
    fn test_invalid_update_rejected() {
        let update = CacheSettingsUpdate {
            max_entries: Some(0),
            ..Default::default()
        };
        assert!(CacheSettings::default().with_update(&update).is_err());
    }

    #[test]
    fn test_timer_change_detected() {
        let settings = CacheSettings::default();
        let update = CacheSettingsUpdate {
            cleanup_interval: Some(1_000),
            ..Default::default()
        };
        assert!(settings.timer_differs(&settings.with_update(&update).unwrap()));
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(CacheSettings::default()).unwrap();
        assert!(json.get("maxEntries").is_some());
        assert!(json.get("defaultTTL").is_some());
        assert!(json.get("compressionThreshold").is_some());
    }
}
