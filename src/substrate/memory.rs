//! In-memory substrate with an optional byte capacity.
//!
//! Capacity is counted as the sum of key and value lengths, the way browser
//! local storage accounts for its quota.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::substrate::Substrate;

// == Memory Substrate ==
#[derive(Debug, Default)]
pub struct MemorySubstrate {
    values: Mutex<HashMap<String, String>>,
    capacity: Option<usize>,
}

impl MemorySubstrate {
    /// Creates an unbounded substrate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a substrate that rejects writes past `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still structurally valid: every write is a single insert.
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Substrate for MemorySubstrate {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.lock();

        if let Some(capacity) = self.capacity {
            let used: usize = values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > capacity {
                return Err(StoreError::QuotaExceeded(format!(
                    "writing '{}' needs {} bytes, capacity is {}",
                    key, needed, capacity
                )));
            }
        }

        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}
