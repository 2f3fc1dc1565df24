//! At-rest confidentiality wrapper.
//!
//! `SealedSubstrate` passes every stored value through a `Cipher`. The only
//! cipher shipped here is `XorObfuscator`, which hides values from casual
//! inspection and gives no security guarantee. Callers needing real
//! confidentiality plug in an authenticated cipher through the trait.

use std::fmt::Debug;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Result, StoreError};
use crate::substrate::Substrate;

// == Cipher Trait ==
/// Reversible transformation applied to values before they reach storage.
pub trait Cipher: Send + Sync + Debug {
    /// Transforms a plaintext value into its stored form.
    fn seal(&self, plaintext: &str) -> String;

    /// Recovers the plaintext, failing on tampered or foreign input.
    fn open(&self, sealed: &str) -> Result<String>;
}

// == XOR Obfuscator ==
/// Repeating-key XOR followed by base64. Obfuscation only.
#[derive(Clone)]
pub struct XorObfuscator {
    key: Vec<u8>,
}

impl XorObfuscator {
    /// Creates an obfuscator. Returns None for an empty key.
    pub fn new(key: impl AsRef<[u8]>) -> Option<Self> {
        let key = key.as_ref();
        if key.is_empty() {
            return None;
        }
        Some(Self { key: key.to_vec() })
    }

    fn apply(&self, bytes: &mut [u8]) {
        for (byte, k) in bytes.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
    }
}

impl Debug for XorObfuscator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorObfuscator")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl Cipher for XorObfuscator {
    fn seal(&self, plaintext: &str) -> String {
        let mut bytes = plaintext.as_bytes().to_vec();
        self.apply(&mut bytes);
        BASE64.encode(bytes)
    }

    fn open(&self, sealed: &str) -> Result<String> {
        let mut bytes = BASE64
            .decode(sealed)
            .map_err(|e| StoreError::Validation(format!("sealed value is not base64: {}", e)))?;
        self.apply(&mut bytes);
        String::from_utf8(bytes)
            .map_err(|_| StoreError::Validation("sealed value opened to invalid UTF-8".into()))
    }
}

// == Sealed Substrate ==
#[derive(Debug)]
pub struct SealedSubstrate<S> {
    inner: S,
    cipher: Box<dyn Cipher>,
}

impl<S: Substrate> SealedSubstrate<S> {
    pub fn new(inner: S, cipher: impl Cipher + 'static) -> Self {
        Self {
            inner,
            cipher: Box::new(cipher),
        }
    }
}

impl<S: Substrate> Substrate for SealedSubstrate<S> {
    fn name(&self) -> &'static str {
        "sealed"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.inner.get(key)? {
            Some(sealed) => self
                .cipher
                .open(&sealed)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, &self.cipher.seal(value))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::MemorySubstrate;

    #[test]
    fn test_empty_key_rejected() {
        assert!(XorObfuscator::new("").is_none());
    }

    #[test]
    fn test_values_hidden_at_rest() {
        let sealed = SealedSubstrate::new(
            MemorySubstrate::new(),
            XorObfuscator::new("secret").unwrap(),
        );
        sealed.set("ffm:cache", r#"[{"key":"visible"}]"#).unwrap();

        let raw = sealed.inner.get("ffm:cache").unwrap().unwrap();
        assert!(!raw.contains("visible"));
        assert_eq!(
            sealed.get("ffm:cache").unwrap().as_deref(),
            Some(r#"[{"key":"visible"}]"#)
        );
    }

    #[test]
    fn test_foreign_value_reported_corrupt() {
        let sealed = SealedSubstrate::new(
            MemorySubstrate::new(),
            XorObfuscator::new("secret").unwrap(),
        );
        sealed.inner.set("ffm:cache", "not base64 !!").unwrap();

        assert!(matches!(
            sealed.get("ffm:cache"),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
