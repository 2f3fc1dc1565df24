//! Substrate Module
//!
//! The synchronous string key-value store the engine persists into. It has
//! no transactions: every value is replaced as a whole, so each collection
//! is written under a single key.

mod file;
mod memory;
mod sealed;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{Result, StoreError};

pub use file::FileSubstrate;
pub use memory::MemorySubstrate;
pub use sealed::{Cipher, SealedSubstrate, XorObfuscator};

// == Storage Keys ==
/// Serialized array of cache entries
pub const CACHE_KEY: &str = "ffm:cache";
/// Last computed metrics (hint only)
pub const METRICS_KEY: &str = "ffm:metrics";
/// Serialized cache settings
pub const CACHE_SETTINGS_KEY: &str = "ffm:cache-settings";
/// Serialized array of stored files
pub const FILES_KEY: &str = "ffm:files";
/// Serialized file store settings
pub const FILE_SETTINGS_KEY: &str = "ffm:files:settings";

// == Substrate Trait ==
/// A blocking key-value store holding whole string values.
///
/// `set` must be atomic: after it returns either the new value is fully
/// stored or the previous value is untouched.
pub trait Substrate: Send + Sync + Debug {
    /// Short name for logging (e.g. "memory", "file").
    fn name(&self) -> &'static str;

    /// Returns the value under `key`, or None if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replaces the value under `key`.
    ///
    /// Fails with `StoreError::QuotaExceeded` when the store is full.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

// == Load Collection ==
/// Reads and parses the JSON stored under `key`.
///
/// Unreadable or unparsable data is logged and treated as absent so startup
/// never fails on a damaged collection. Values that fail to parse are
/// removed so the next write starts clean.
pub(crate) fn load_collection<T: DeserializeOwned>(substrate: &dyn Substrate, key: &str) -> Option<T> {
    let raw = match substrate.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e @ StoreError::Corrupt { .. }) => {
            warn!("Discarding unreadable '{}': {}", key, e);
            discard(substrate, key);
            return None;
        }
        Err(e) => {
            warn!("Failed to read '{}', starting empty: {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding corrupt '{}': {}", key, e);
            discard(substrate, key);
            None
        }
    }
}

fn discard(substrate: &dyn Substrate, key: &str) {
    if let Err(e) = substrate.remove(key) {
        warn!("Failed to remove corrupt '{}': {}", key, e);
    }
}

/// Memory substrate whose writes can be refused on demand, for exercising
/// rollback paths.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct SwitchableSubstrate {
    inner: MemorySubstrate,
    refuse_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl SwitchableSubstrate {
    pub(crate) fn refuse_writes(&self, refuse: bool) {
        self.refuse_writes
            .store(refuse, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.refuse_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("writes refused")));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Substrate for SwitchableSubstrate {
    fn name(&self) -> &'static str {
        "switchable"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_collection_parses() {
        let substrate = MemorySubstrate::new();
        substrate.set(FILES_KEY, "[1,2,3]").unwrap();

        let loaded: Option<Vec<u32>> = load_collection(&substrate, FILES_KEY);
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_load_collection_discards_corrupt() {
        let substrate = MemorySubstrate::new();
        substrate.set(FILES_KEY, "{not json").unwrap();

        let loaded: Option<Vec<u32>> = load_collection(&substrate, FILES_KEY);
        assert!(loaded.is_none());
        assert!(substrate.get(FILES_KEY).unwrap().is_none());
    }

    #[test]
    fn test_load_collection_absent() {
        let substrate = MemorySubstrate::new();
        let loaded: Option<Vec<u32>> = load_collection(&substrate, CACHE_KEY);
        assert!(loaded.is_none());
    }
}
