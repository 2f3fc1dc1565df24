//! Compression for large cache values.
//!
//! Values are compressed with zstd and stored as base64 text, since the
//! substrate only holds strings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Result, StoreError};

/// Default zstd level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// == Compressor ==
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: i32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Compressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    /// Compresses serialized text into its stored form.
    pub fn compress(&self, text: &str) -> Result<String> {
        let compressed = zstd::encode_all(text.as_bytes(), self.level)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        Ok(BASE64.encode(compressed))
    }

    /// Reverses `compress`.
    pub fn decompress(&self, stored: &str) -> Result<String> {
        let bytes = BASE64
            .decode(stored)
            .map_err(|e| StoreError::Compression(format!("invalid base64: {}", e)))?;
        let decompressed = zstd::decode_all(bytes.as_slice())
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        String::from_utf8(decompressed)
            .map_err(|_| StoreError::Compression("decompressed data is not UTF-8".into()))
    }

    /// Compresses `text` only if the stored form comes out smaller.
    ///
    /// Failures are logged and yield None, which keeps the value plain.
    pub fn compress_if_smaller(&self, text: &str) -> Option<String> {
        match self.compress(text) {
            Ok(stored) if stored.len() < text.len() => Some(stored),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Compression failed, storing uncompressed: {}", e);
                None
            }
        }
    }
}
