//! Cache Module
//!
//! Provides the persistent key-value cache with TTL expiration, oldest-first
//! trimming and best-effort compression.

mod compression;
mod entry;
mod order;
mod settings;
mod stats;
mod store;


// Re-export public types
pub use compression::{Compressor, DEFAULT_COMPRESSION_LEVEL};
pub use entry::{current_timestamp_ms, CacheEntry};
pub use order::CreationOrder;
pub use settings::{CacheSettings, CacheSettingsUpdate, DEFAULT_COMPRESSION_THRESHOLD};
pub use stats::CacheStats;
pub use store::{CacheStore, CleanupOutcome, PendingCompression, SweepOutcome};
