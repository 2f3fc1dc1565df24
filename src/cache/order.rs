//! Creation Order Module
//!
//! Tracks the order in which cache keys were written, oldest first. Reads do
//! not reorder keys: eviction is oldest-created first, not least recently
//! used.

use std::collections::VecDeque;

// == Creation Order ==
/// Keys ordered by creation time.
///
/// - Front = oldest
/// - Back = newest
#[derive(Debug, Default, Clone)]
pub struct CreationOrder {
    order: VecDeque<String>,
}

impl CreationOrder {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Push Newest ==
    /// Records a write of `key`. Overwriting an existing key makes it newest.
    pub fn push_newest(&mut self, key: &str) {
        self.remove(key);
        self.order.push_back(key.to_string());
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    // == Oldest ==
    /// Returns up to `count` of the oldest keys, oldest first.
    pub fn oldest(&self, count: usize) -> Vec<String> {
        self.order.iter().take(count).cloned().collect()
    }

    // == Iter ==
    /// Iterates keys from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
