//! Error types for the storage engine
//!
//! Provides unified error handling using thiserror. These errors stay inside
//! the crate: the public engine surface converts them into plain values or
//! `{success, error}` results before returning.

use thiserror::Error;

// == Store Error Enum ==
/// Unified error type for the storage engine.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A write would push usage past a configured quota
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A value could not be serialized or deserialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression or decompression failed
    #[error("Compression failed: {0}")]
    Compression(String),

    /// The underlying substrate failed to read or write
    #[error("Substrate I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data could not be decoded
    #[error("Corrupt data under '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// A backup snapshot failed validation
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// Input rejected by a validation rule
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl StoreError {
    // == Is Quota ==
    /// Returns true when the error is recoverable by freeing space.
    pub fn is_quota(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the storage engine.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_quota() {
        assert!(StoreError::QuotaExceeded("full".into()).is_quota());
        assert!(!StoreError::Validation("bad".into()).is_quota());
    }

    #[test]
    fn test_display_messages() {
        let err = StoreError::Corrupt {
            key: "ffm:cache".into(),
            reason: "expected array".into(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt data under 'ffm:cache': expected array"
        );
    }
}
