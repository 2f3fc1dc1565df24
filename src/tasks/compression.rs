//! Deferred compression task

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{Compressor, PendingCompression};
use crate::handle::EngineHandle;

/// Compresses a pending write on the blocking pool and merges the result.
///
/// # Returns
/// A JoinHandle resolving to true if the compressed form was stored. The
/// result is discarded when the entry changed in the meantime.
pub fn spawn_compression(
    handle: EngineHandle,
    pending: PendingCompression,
    compressor: Compressor,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let serialized = pending.serialized.clone();
        let compressed =
            tokio::task::spawn_blocking(move || compressor.compress(&serialized)).await;

        let stored = match compressed {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                warn!("Deferred compression of '{}' failed: {}", pending.key, e);
                return false;
            }
            Err(e) => {
                warn!("Compression worker for '{}' failed: {}", pending.key, e);
                return false;
            }
        };

        debug!(
            "Compressed '{}' from {} to {} bytes",
            pending.key,
            pending.serialized.len(),
            stored.len()
        );
        handle.engine.write().await.merge_compressed(&pending, stored)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::StorageEngine;
    use crate::substrate::MemorySubstrate;
    use std::sync::Arc;

    fn handle_with_entry(key: &str, value: &str) -> EngineHandle {
        let mut engine =
            StorageEngine::open(Arc::new(MemorySubstrate::new()), &Config::default());
        assert!(engine.set_uncompressed(key, value, None));
        EngineHandle::new(engine)
    }

    #[tokio::test]
    async fn test_compression_merges_when_unchanged() {
        let big = "m".repeat(30_000);
        let handle = handle_with_entry("doc", &big);
        let (pending, compressor) = {
            let engine = handle.engine.read().await;
            (engine.pending_compression("doc").unwrap(), engine.compressor())
        };

        assert!(spawn_compression(handle.clone(), pending, compressor)
            .await
            .unwrap());

        let mut engine = handle.engine.write().await;
        assert!(engine.pending_compression("doc").is_none());
        assert_eq!(engine.get::<String>("doc"), Some(big));
    }

    #[tokio::test]
    async fn test_compression_discarded_after_overwrite() {
        let handle = handle_with_entry("doc", &"m".repeat(30_000));
        let (pending, compressor) = {
            let engine = handle.engine.read().await;
            (engine.pending_compression("doc").unwrap(), engine.compressor())
        };

        // Overwritten before the worker finishes
        let replacement = "n".repeat(30_000);
        assert!(handle
            .engine
            .write()
            .await
            .set_uncompressed("doc", &replacement, None));

        assert!(!spawn_compression(handle.clone(), pending, compressor)
            .await
            .unwrap());
        let mut engine = handle.engine.write().await;
        assert_eq!(engine.get::<String>("doc"), Some(replacement));
    }

    #[tokio::test]
    async fn test_compression_discarded_after_delete() {
        let handle = handle_with_entry("doc", &"m".repeat(30_000));
        let (pending, compressor) = {
            let engine = handle.engine.read().await;
            (engine.pending_compression("doc").unwrap(), engine.compressor())
        };
        assert!(handle.engine.write().await.delete("doc"));

        assert!(!spawn_compression(handle.clone(), pending, compressor)
            .await
            .unwrap());
        assert!(!handle.engine.write().await.has("doc"));
    }
}
