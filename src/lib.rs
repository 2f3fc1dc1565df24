//! ffm_cache - Persistent storage engine for a file-manager
//!
//! A TTL-bounded key-value cache with compression plus a quota-bounded
//! file store, both persisted into a pluggable string key-value substrate.

pub mod backup;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod files;
pub mod handle;
pub mod metrics;
pub mod models;
pub mod substrate;
pub mod tasks;

pub use backup::Backup;
pub use config::Config;
pub use engine::StorageEngine;
pub use error::StoreError;
pub use events::{EventDetails, EventKind, StorageEvent};
pub use handle::EngineHandle;
pub use metrics::StorageMetrics;
pub use models::{OperationResult, OptimizeReport, StoreFileResult};
