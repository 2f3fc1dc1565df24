//! Periodic Optimizer Task
//!
//! Background task that runs an optimize pass (cleanup plus compression
//! sweep) every `cleanupInterval` while cleanup is enabled.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheSettings;
use crate::handle::EngineHandle;

/// Spawns the periodic optimizer.
///
/// The timer is recreated whenever `settings` publishes a change, so new
/// intervals take effect without restarting the task. Passes that would
/// overlap a running one are skipped by the handle.
///
/// # Arguments
/// * `handle` - Engine to optimize
/// * `settings` - Receiver for cache settings changes
///
/// # Returns
/// A JoinHandle for the spawned task, used to abort it on shutdown.
pub fn spawn_optimizer_task(
    handle: EngineHandle,
    mut settings: watch::Receiver<CacheSettings>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let current = settings.borrow_and_update().clone();

            if !current.enable_cleanup {
                debug!("Periodic optimizer disabled, waiting for settings change");
                if settings.changed().await.is_err() {
                    break;
                }
                continue;
            }

            let interval = Duration::from_millis(current.cleanup_interval);
            info!(
                "Periodic optimizer running every {} ms",
                current.cleanup_interval
            );

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Some(report) = handle.optimize().await {
                            debug!("Periodic optimize: {} improvements", report.improvements.len());
                        }
                    }
                    changed = settings.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        debug!("Cleanup settings changed, restarting timer");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettingsUpdate;
    use crate::config::Config;
    use crate::engine::StorageEngine;
    use crate::events::EventKind;
    use crate::substrate::MemorySubstrate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn handle_with(config: Config) -> (EngineHandle, Arc<AtomicUsize>) {
        let engine = StorageEngine::open(Arc::new(MemorySubstrate::new()), &config);
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = passes.clone();
        engine.add_event_listener(EventKind::Cleanup, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (EngineHandle::new(engine), passes)
    }

    #[tokio::test]
    async fn test_optimizer_removes_expired_entries() {
        let (handle, _) = handle_with(Config {
            cleanup_interval: 50,
            ..Config::default()
        });
        {
            let mut engine = handle.engine.write().await;
            engine.set("expire_soon", "value", Some(Duration::from_millis(10)));
            engine.set("long_lived", "value", None);
        }

        let task = handle.spawn_optimizer().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        {
            let engine = handle.engine.read().await;
            assert_eq!(engine.stats().expirations, 1);
            assert_eq!(engine.metrics().entry_count, 1);
        }
        task.abort();
    }

    #[tokio::test]
    async fn test_optimizer_idle_while_disabled() {
        let (handle, passes) = handle_with(Config {
            enable_cleanup: false,
            cleanup_interval: 20,
            ..Config::default()
        });

        let task = handle.spawn_optimizer().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 0);

        let result = handle
            .engine
            .write()
            .await
            .update_cache_settings(CacheSettingsUpdate {
                enable_cleanup: Some(true),
                ..Default::default()
            });
        assert!(result.success);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(passes.load(Ordering::SeqCst) > 0);
        task.abort();
    }

    #[tokio::test]
    async fn test_optimizer_picks_up_new_interval() {
        let (handle, passes) = handle_with(Config {
            cleanup_interval: 60 * 60 * 1000,
            ..Config::default()
        });

        let task = handle.spawn_optimizer().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 0);

        handle
            .engine
            .write()
            .await
            .update_cache_settings(CacheSettingsUpdate {
                cleanup_interval: Some(20),
                ..Default::default()
            });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(passes.load(Ordering::SeqCst) >= 2);
        task.abort();
    }

    #[tokio::test]
    async fn test_optimizer_can_be_aborted() {
        let (handle, _) = handle_with(Config::default());
        let task = handle.spawn_optimizer().await;

        task.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(task.is_finished(), "Task should be finished after abort");
    }
}
