//! Event Bus Module
//!
//! In-process publish/subscribe for storage notifications. Nothing here is
//! persisted; listeners are registered per engine instance.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::warn;

use crate::cache::current_timestamp_ms;

// == Event Kind ==
/// Kind of storage event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CacheHit,
    CacheMiss,
    CacheSet,
    CacheDelete,
    Cleanup,
    QuotaExceeded,
}

/// Why a read missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissReason {
    Absent,
    Expired,
    /// Stored data could not be decoded into the requested type
    Undecodable,
}

/// Operation that ran into the quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaContext {
    /// "cache-set" or "file-store"
    pub operation: &'static str,
    /// Cache key or file name being written
    pub target: String,
    /// Bytes the write tried to add
    pub attempted_bytes: usize,
}

// == Event Details ==
/// Payload of a storage event, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventDetails {
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
        reason: MissReason,
    },
    CacheSet {
        key: String,
        size: usize,
        compressed: bool,
    },
    CacheDelete {
        key: String,
    },
    Cleanup {
        expired: usize,
        trimmed: usize,
    },
    #[serde(rename_all = "camelCase")]
    QuotaExceeded {
        removed_entries: usize,
        context: QuotaContext,
    },
}

impl EventDetails {
    pub fn kind(&self) -> EventKind {
        match self {
            EventDetails::CacheHit { .. } => EventKind::CacheHit,
            EventDetails::CacheMiss { .. } => EventKind::CacheMiss,
            EventDetails::CacheSet { .. } => EventKind::CacheSet,
            EventDetails::CacheDelete { .. } => EventKind::CacheDelete,
            EventDetails::Cleanup { .. } => EventKind::Cleanup,
            EventDetails::QuotaExceeded { .. } => EventKind::QuotaExceeded,
        }
    }
}

// == Storage Event ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageEvent {
    /// Epoch milliseconds
    pub timestamp: u64,
    pub details: EventDetails,
}

impl StorageEvent {
    pub fn kind(&self) -> EventKind {
        self.details.kind()
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

// == Event Bus ==
/// Cloning yields another handle to the same set of listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count: usize = self
            .listeners
            .read()
            .map(|l| l.values().map(Vec::len).sum())
            .unwrap_or(0);
        f.debug_struct("EventBus").field("listeners", &count).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // == Subscribe ==
    /// Registers `listener` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    // == Unsubscribe ==
    /// Removes a listener. Returns false if it was not registered for `kind`.
    pub fn unsubscribe(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match listeners.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(lid, _)| *lid != id);
                list.len() != before
            }
            None => false,
        }
    }

    // == Emit ==
    /// Delivers an event to every listener of its kind, in subscription order.
    ///
    /// A panicking listener is logged and skipped; later listeners still run.
    pub fn emit(&self, details: EventDetails) {
        let event = StorageEvent {
            timestamp: current_timestamp_ms(),
            details,
        };

        // Snapshot so listeners may subscribe/unsubscribe while being called
        let targets: Vec<(ListenerId, Listener)> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match listeners.get(&event.kind()) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for (id, listener) in targets {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if result.is_err() {
                warn!("Listener {:?} panicked handling {:?}", id, event.kind());
            }
        }
    }
}
