//! Configuration Module
//!
//! Handles loading engine configuration from environment variables. Cache
//! and file store settings found in storage take precedence over these
//! defaults once they have been saved.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::{CacheSettings, DEFAULT_COMPRESSION_LEVEL, DEFAULT_COMPRESSION_THRESHOLD};
use crate::files::{FileStoreSettings, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_STORAGE_SIZE};

/// Default combined quota for cache and files (5 MB, a typical local storage limit)
pub const DEFAULT_TOTAL_QUOTA: usize = 5 * 1024 * 1024;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the file-backed substrate
    pub data_dir: PathBuf,
    /// Byte ceiling for cache entries and file payloads together
    pub total_quota: usize,
    /// Entry count restored by each cleanup pass
    pub max_entries: usize,
    /// Default TTL in milliseconds
    pub default_ttl: u64,
    /// Serialized size above which values are compressed
    pub compression_threshold: usize,
    /// zstd compression level
    pub compression_level: i32,
    /// Optimizer interval in milliseconds
    pub cleanup_interval: u64,
    /// Whether the periodic optimizer runs
    pub enable_cleanup: bool,
    /// Largest accepted upload in bytes
    pub max_file_size: usize,
    /// Byte budget for file payloads alone
    pub max_storage_size: usize,
    /// Enables at-rest obfuscation when set
    pub obfuscation_key: Option<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `FFM_DATA_DIR` - Storage directory (default: ./ffm-data)
    /// - `FFM_TOTAL_QUOTA` - Combined quota in bytes (default: 5 MB)
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `DEFAULT_TTL` - Default TTL in milliseconds (default: 1 hour)
    /// - `COMPRESSION_THRESHOLD` - Compression threshold in bytes (default: 10240)
    /// - `COMPRESSION_LEVEL` - zstd level (default: 3)
    /// - `CLEANUP_INTERVAL` - Optimizer interval in milliseconds (default: 5 minutes)
    /// - `ENABLE_CLEANUP` - Run the periodic optimizer (default: true)
    /// - `FFM_MAX_FILE_SIZE` - Largest upload in bytes (default: 50 MB)
    /// - `FFM_MAX_STORAGE_SIZE` - File payload budget in bytes (default: 4 MB)
    /// - `FFM_OBFUSCATION_KEY` - Key for at-rest obfuscation (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env::var("FFM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            total_quota: env_or("FFM_TOTAL_QUOTA", defaults.total_quota),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            compression_threshold: env_or("COMPRESSION_THRESHOLD", defaults.compression_threshold),
            compression_level: env_or("COMPRESSION_LEVEL", defaults.compression_level),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            enable_cleanup: env_or("ENABLE_CLEANUP", defaults.enable_cleanup),
            max_file_size: env_or("FFM_MAX_FILE_SIZE", defaults.max_file_size),
            max_storage_size: env_or("FFM_MAX_STORAGE_SIZE", defaults.max_storage_size),
            obfuscation_key: env::var("FFM_OBFUSCATION_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        }
    }

    /// Cache settings used when none are stored.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            max_entries: self.max_entries,
            default_ttl: self.default_ttl,
            compression_threshold: self.compression_threshold,
            enable_cleanup: self.enable_cleanup,
            cleanup_interval: self.cleanup_interval,
        }
    }

    /// File store settings used when none are stored.
    pub fn file_settings(&self) -> FileStoreSettings {
        FileStoreSettings {
            max_file_size: self.max_file_size,
            max_storage_size: self.max_storage_size,
            ..FileStoreSettings::default()
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        let cache = CacheSettings::default();
        Self {
            data_dir: PathBuf::from("./ffm-data"),
            total_quota: DEFAULT_TOTAL_QUOTA,
            max_entries: cache.max_entries,
            default_ttl: cache.default_ttl,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            cleanup_interval: cache.cleanup_interval,
            enable_cleanup: cache.enable_cleanup,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_storage_size: DEFAULT_MAX_STORAGE_SIZE,
            obfuscation_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.total_quota, 5 * 1024 * 1024);
        assert_eq!(config.compression_threshold, 10240);
        assert!(config.obfuscation_key.is_none());
        assert_eq!(config.cache_settings(), CacheSettings::default());
    }

    #[test]
    fn test_config_from_env_defaults() {
        env::remove_var("MAX_ENTRIES");
        env::remove_var("DEFAULT_TTL");
        env::remove_var("FFM_TOTAL_QUOTA");
        env::remove_var("FFM_OBFUSCATION_KEY");

        let config = Config::from_env();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.default_ttl, 3_600_000);
        assert_eq!(config.total_quota, DEFAULT_TOTAL_QUOTA);
        assert!(config.obfuscation_key.is_none());
    }

    #[test]
    fn test_file_settings_keep_default_types() {
        let config = Config {
            max_file_size: 10,
            ..Config::default()
        };
        let settings = config.file_settings();
        assert_eq!(settings.max_file_size, 10);
        assert!(settings.is_type_allowed("text/plain"));
    }
}
