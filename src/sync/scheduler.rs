use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::SyncOutcome;
use super::connectivity::Connectivity;
use super::manager::SyncManager;
use crate::queue::OperationQueue;

/// Messages to control the sync scheduler
#[derive(Debug)]
pub enum SyncSchedulerMessage {
    /// Run a cycle now instead of waiting for the interval
    SyncNow,
    /// App closing
    Shutdown,
}

/// Handle for the periodic sync scheduler
pub struct SyncScheduler {
    sender: mpsc::Sender<SyncSchedulerMessage>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Ask for an immediate cycle
    pub fn sync_now(&self) {
        let _ = self.sender.try_send(SyncSchedulerMessage::SyncNow);
    }

    /// Shut down the scheduler and wait for the current cycle to finish
    pub async fn shutdown(self) {
        let _ = self.sender.send(SyncSchedulerMessage::Shutdown).await;
        if let Err(e) = self.handle.await {
            log::warn!("Sync scheduler: task ended abnormally: {}", e);
        }
    }

    /// Get a clone of the internal sender for external message producers
    pub fn sender_clone(&self) -> mpsc::Sender<SyncSchedulerMessage> {
        self.sender.clone()
    }
}

/// Minimum interval between cycles (prevents runaway syncing)
const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Start the periodic sync scheduler.
///
/// Every `interval` (or on [`SyncScheduler::sync_now`]) the loop drains the
/// operation queue, so local edits reach the remote store first, and then
/// pulls progress.
pub fn start_sync_scheduler(
    sync_manager: Arc<SyncManager>,
    queue: OperationQueue,
    connectivity: Connectivity,
    interval: Duration,
) -> SyncScheduler {
    let (tx, rx) = mpsc::channel(32);
    let interval = interval.max(MIN_INTERVAL);

    let handle = tokio::spawn(async move {
        sync_scheduler_loop(sync_manager, queue, connectivity, interval, rx).await;
    });

    SyncScheduler { sender: tx, handle }
}

async fn run_cycle(sync_manager: &SyncManager, queue: &OperationQueue, connectivity: &Connectivity) {
    if !connectivity.is_online() {
        log::debug!("Sync scheduler: offline, skipping cycle");
        return;
    }

    let report = queue.drain().await;
    log::debug!("Sync scheduler: queue drain finished ({:?})", report.stop);

    match sync_manager.sync_progress().await {
        Ok(SyncOutcome::Completed(result)) => {
            log::info!("Sync scheduler: {}", result.summary());
        }
        Ok(SyncOutcome::Skipped) => {
            log::debug!("Sync scheduler: sync already running");
        }
        Err(e) => {
            log::warn!("Sync scheduler: progress sync failed: {}", e);
        }
    }
}

/// Main scheduler loop
async fn sync_scheduler_loop(
    sync_manager: Arc<SyncManager>,
    queue: OperationQueue,
    connectivity: Connectivity,
    interval: Duration,
    mut receiver: mpsc::Receiver<SyncSchedulerMessage>,
) {
    log::info!("Sync scheduler started ({}s interval)", interval.as_secs());

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                run_cycle(&sync_manager, &queue, &connectivity).await;
            }
            msg = receiver.recv() => {
                match msg {
                    Some(SyncSchedulerMessage::SyncNow) => {
                        log::info!("Sync scheduler: sync requested");
                        run_cycle(&sync_manager, &queue, &connectivity).await;
                    }
                    Some(SyncSchedulerMessage::Shutdown) | None => {
                        log::info!("Sync scheduler: shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{OperationKind, QueueConfig};
    use crate::store::LocalStore;
    use crate::sync::SyncConfig;
    use crate::testing::MockRemote;
    use serde_json::json;

    async fn settle<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..50 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_drains_then_pulls_progress() {
        let remote = MockRemote::with_words(3);
        let store = LocalStore::open_in_memory().unwrap();
        let connectivity = Connectivity::new(true);
        let queue = OperationQueue::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            QueueConfig {
                auto_drain: false,
                ..Default::default()
            },
        )
        .unwrap();
        let sync = Arc::new(SyncManager::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            SyncConfig::for_user("u"),
        ));
        queue
            .enqueue(
                OperationKind::UpsertProgress,
                json!({"user_id": "u", "word_id": 2, "is_learned": true}),
            )
            .unwrap();

        let scheduler = start_sync_scheduler(sync, queue.clone(), connectivity, Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(settle(|| remote.calls("list_progress") == 1).await);
        assert_eq!(
            remote.call_log(),
            vec!["upsert_progress:u:2", "list_progress:u:0"]
        );
        assert!(store.get_progress("u", "word0001").unwrap().unwrap().is_learned);

        scheduler.sync_now();
        assert!(settle(|| remote.calls("list_progress") == 2).await);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_cycle_makes_no_calls() {
        let remote = MockRemote::with_words(1);
        let store = LocalStore::open_in_memory().unwrap();
        let connectivity = Connectivity::new(false);
        let queue =
            OperationQueue::new(store.clone(), remote.clone(), connectivity.clone(), QueueConfig::default())
                .unwrap();
        let sync = Arc::new(SyncManager::new(
            store,
            remote.clone(),
            connectivity.clone(),
            SyncConfig::for_user("u"),
        ));

        let scheduler = start_sync_scheduler(sync, queue, connectivity, Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(125)).await;

        assert!(remote.call_log().is_empty());
        scheduler.shutdown().await;
    }
}
