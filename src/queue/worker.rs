use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::backlog::{OperationBacklog, OperationKind, QueuedOperation};
use super::payload::{self, DeleteProgressPayload, DeleteWordPayload, ProgressPayload};
use super::{OperationError, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES};
use crate::remote::{with_timeout, RemoteStore};
use crate::store::{self, LocalStore, StoreError, META_QUEUE_BACKLOG};
use crate::sync::{Connectivity, StatusFeed, Subscription};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts before an operation is parked as failed
    pub max_retries: u32,
    /// Upper bound of the exponential backoff
    pub max_backoff: Duration,
    /// Timeout applied to every remote call
    pub request_timeout: Duration,
    /// Start draining on enqueue, retry and resume
    pub auto_drain: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_backoff: DEFAULT_MAX_BACKOFF,
            request_timeout: Duration::from_secs(10),
            auto_drain: true,
        }
    }
}

/// Snapshot published to queue observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending_count: usize,
    pub failed_count: usize,
    pub is_processing: bool,
    pub is_paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Why a drain returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainStop {
    /// No pending operations left
    #[default]
    Empty,
    Offline,
    Paused,
    /// Another drain was already running; this call did nothing
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub succeeded: usize,
    /// Transient failures that were retried
    pub retried: usize,
    /// Operations parked as failed during this drain
    pub failed: usize,
    pub stop: DrainStop,
}

/// Delay before the next attempt after `retry_count` failures: 2^n seconds, capped
pub fn backoff_delay(retry_count: u32, cap: Duration) -> Duration {
    let secs = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(cap)
}

struct QueueInner {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    config: QueueConfig,
    backlog: Mutex<OperationBacklog>,
    processing: AtomicBool,
    paused: AtomicBool,
    status: StatusFeed<QueueStatus>,
}

/// Resets the processing flag even if the drain future is dropped midway
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the operation queue. Cheap to clone; clones share one backlog.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Open the queue, restoring any backlog persisted by a previous run.
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        config: QueueConfig,
    ) -> store::Result<Self> {
        let backlog: OperationBacklog = store.get_meta(META_QUEUE_BACKLOG)?.unwrap_or_default();
        if !backlog.items.is_empty() {
            log::info!(
                "Operation queue: restored {} pending, {} failed operation(s)",
                backlog.pending_count(),
                backlog.failed_count()
            );
        }

        let status = QueueStatus {
            pending_count: backlog.pending_count(),
            failed_count: backlog.failed_count(),
            ..Default::default()
        };

        Ok(Self {
            inner: Arc::new(QueueInner {
                store,
                remote,
                connectivity,
                config,
                backlog: Mutex::new(backlog),
                processing: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                status: StatusFeed::new(status),
            }),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Append an operation and persist the backlog before returning.
    ///
    /// Starts a drain in the background when online and auto-drain is on.
    pub fn enqueue(&self, kind: OperationKind, payload: serde_json::Value) -> store::Result<Uuid> {
        let id = {
            let mut backlog = self.lock_backlog()?;
            let id = backlog.enqueue(kind, payload, self.inner.config.max_retries);
            if let Err(e) = self.inner.store.set_meta(META_QUEUE_BACKLOG, &*backlog) {
                backlog.complete(id);
                return Err(e);
            }
            id
        };

        log::debug!("Operation queue: enqueued {} {}", kind, id);
        self.publish_status();
        self.trigger_drain();
        Ok(id)
    }

    /// Process pending operations in order until the backlog is empty, the
    /// device goes offline, or the queue is paused.
    ///
    /// Only one drain runs at a time; a concurrent call returns at once with
    /// [`DrainStop::AlreadyRunning`].
    pub async fn drain(&self) -> DrainReport {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Operation queue: drain already running");
            return DrainReport {
                stop: DrainStop::AlreadyRunning,
                ..Default::default()
            };
        }

        let report = {
            let _guard = ProcessingGuard(&self.inner.processing);
            self.publish_status();
            self.run().await
        };
        self.publish_status();

        if report.succeeded + report.failed > 0 {
            log::info!(
                "Operation queue: drained {} succeeded, {} failed, {} retries ({:?})",
                report.succeeded,
                report.failed,
                report.retried,
                report.stop
            );
        }

        // An enqueue that raced the end of the loop saw the flag still set
        if report.stop == DrainStop::Empty && self.pending_count() > 0 {
            self.trigger_drain();
        }

        report
    }

    async fn run(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let mut online = self.inner.connectivity.subscribe();

        loop {
            if !self.inner.connectivity.is_online() {
                report.stop = DrainStop::Offline;
                break;
            }
            if self.is_paused() {
                report.stop = DrainStop::Paused;
                break;
            }

            let head = match self.lock_backlog() {
                Ok(backlog) => backlog.head().cloned(),
                Err(e) => {
                    log::error!("Operation queue: {}", e);
                    break;
                }
            };
            let Some(op) = head else {
                break;
            };

            match self.process(&op).await {
                Ok(()) => {
                    report.succeeded += 1;
                    if let Err(e) = self.change_backlog(|b| b.complete(op.id)) {
                        log::error!("Operation queue: {}", e);
                        break;
                    }
                    self.inner
                        .status
                        .update(|s| s.last_processed_at = Some(Utc::now()));
                    log::debug!("Operation queue: {} {} done", op.kind, op.id);
                }
                Err(err) => {
                    let terminal = !err.is_retryable();
                    let message = err.to_string();
                    let outcome = self.change_backlog(|b| {
                        b.record_failure(op.id, message.clone(), terminal)
                            .map(|item| (item.retry_count, item.is_failed()))
                    });
                    self.inner.status.update(|s| s.last_error = Some(message.clone()));

                    match outcome {
                        Ok(Some((_, true))) => {
                            report.failed += 1;
                            log::warn!(
                                "Operation queue: {} {} failed permanently: {}",
                                op.kind,
                                op.id,
                                message
                            );
                        }
                        Ok(Some((retry_count, false))) => {
                            report.retried += 1;
                            let delay = backoff_delay(retry_count, self.inner.config.max_backoff);
                            log::info!(
                                "Operation queue: {} {} failed ({}), retrying in {:?}",
                                op.kind,
                                op.id,
                                message,
                                delay
                            );
                            self.publish_status();
                            self.wait_backoff(delay, &mut online).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log::error!("Operation queue: {}", e);
                            break;
                        }
                    }
                }
            }
            self.publish_status();
        }

        report
    }

    async fn wait_backoff(&self, delay: Duration, online: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_until_offline(online) => {
                log::debug!("Operation queue: went offline during backoff");
            }
        }
    }

    async fn process(&self, op: &QueuedOperation) -> Result<(), OperationError> {
        let store = &self.inner.store;
        let remote = &self.inner.remote;
        let timeout = self.inner.config.request_timeout;

        match op.kind {
            OperationKind::UpsertProgress => {
                let progress: ProgressPayload = payload::decode(&op.payload)?;
                let upsert = progress.into_upsert(store)?;
                with_timeout(timeout, remote.upsert_progress(&upsert)).await?;
            }
            OperationKind::DeleteProgress => {
                let target: DeleteProgressPayload = payload::decode(&op.payload)?;
                let (user_id, word_id) = match target.resolve(store) {
                    Ok(resolved) => resolved,
                    Err(OperationError::Unresolved(key)) => {
                        let Some(id) = self.lookup_remote_id(&key).await? else {
                            log::debug!("Operation queue: '{}' unknown remotely, nothing to delete", key);
                            return Ok(());
                        };
                        (target.user_id.clone().unwrap_or_default(), id)
                    }
                    Err(e) => return Err(e),
                };
                with_timeout(timeout, remote.delete_progress(&user_id, word_id)).await?;
            }
            OperationKind::UpsertWord => {
                let upsert = payload::word_upsert(&op.payload)?;
                let stored = with_timeout(timeout, remote.upsert_word(&upsert)).await?;
                store.assign_remote_id(&upsert.word, stored.id)?;
            }
            OperationKind::DeleteWord => {
                let target: DeleteWordPayload = payload::decode(&op.payload)?;
                let id = match target.resolve(store) {
                    Ok(id) => id,
                    Err(OperationError::Unresolved(key)) => {
                        let Some(id) = self.lookup_remote_id(&key).await? else {
                            log::debug!("Operation queue: '{}' unknown remotely, nothing to delete", key);
                            return Ok(());
                        };
                        id
                    }
                    Err(e) => return Err(e),
                };
                with_timeout(timeout, remote.delete_word(id)).await?;
            }
        }
        Ok(())
    }

    /// Ask the remote store for the id of a word the local store no longer knows
    async fn lookup_remote_id(&self, key: &str) -> Result<Option<i64>, OperationError> {
        let keys = [key.to_string()];
        let ids = with_timeout(self.inner.config.request_timeout, self.inner.remote.resolve_word_ids(&keys)).await?;
        Ok(ids.get(key).copied())
    }

    /// Spawn a background drain when nothing prevents one
    fn trigger_drain(&self) {
        if !self.inner.config.auto_drain
            || !self.inner.connectivity.is_online()
            || self.is_paused()
            || self.is_processing()
        {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let queue = self.clone();
                handle.spawn(async move {
                    queue.drain().await;
                });
            }
            Err(_) => log::debug!("Operation queue: no runtime, drain deferred"),
        }
    }

    /// Drain whenever connectivity comes back, for as long as the task runs.
    pub fn start(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let mut online = self.inner.connectivity.subscribe();

        tokio::spawn(async move {
            if *online.borrow_and_update() && queue.pending_count() > 0 {
                queue.drain().await;
            }
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online {
                    log::info!("Operation queue: back online, draining");
                    queue.drain().await;
                }
            }
        })
    }

    /// Reset failed operations so the next drain retries them in place.
    pub fn retry_failed(&self) -> store::Result<usize> {
        let reset = self.change_backlog(|b| b.retry_failed())?;
        if reset > 0 {
            log::info!("Operation queue: retrying {} failed operation(s)", reset);
        }
        self.publish_status();
        self.trigger_drain();
        Ok(reset)
    }

    /// Permanently drop failed operations. Pending ones are untouched.
    pub fn clear_failed(&self) -> store::Result<usize> {
        let removed = self.change_backlog(|b| b.clear_failed())?;
        if removed > 0 {
            log::info!("Operation queue: discarded {} failed operation(s)", removed);
        }
        self.publish_status();
        Ok(removed)
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
        log::info!("Operation queue: paused");
        self.publish_status();
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        log::info!("Operation queue: resumed");
        self.publish_status();
        self.trigger_drain();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.inner.status.subscribe()
    }

    /// Call `listener` with the current status now and after every change
    pub fn listen<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(QueueStatus) + Send + 'static,
    {
        self.inner.status.listen(listener)
    }

    pub fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.lock_backlog().map(|b| b.pending()).unwrap_or_default()
    }

    pub fn failed_operations(&self) -> Vec<QueuedOperation> {
        self.lock_backlog().map(|b| b.failed()).unwrap_or_default()
    }

    fn pending_count(&self) -> usize {
        self.lock_backlog().map(|b| b.pending_count()).unwrap_or(0)
    }

    fn lock_backlog(&self) -> store::Result<MutexGuard<'_, OperationBacklog>> {
        self.inner.backlog.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Apply `change` and persist the backlog. A failed write is logged and
    /// the in-memory backlog stays authoritative until the next write.
    fn change_backlog<R>(&self, change: impl FnOnce(&mut OperationBacklog) -> R) -> store::Result<R> {
        let mut backlog = self.lock_backlog()?;
        let result = change(&mut backlog);
        if let Err(e) = self.inner.store.set_meta(META_QUEUE_BACKLOG, &*backlog) {
            log::warn!("Operation queue: failed to persist backlog: {}", e);
        }
        Ok(result)
    }

    fn publish_status(&self) {
        let (pending, failed) = match self.lock_backlog() {
            Ok(backlog) => (backlog.pending_count(), backlog.failed_count()),
            Err(_) => return,
        };
        let processing = self.is_processing();
        let paused = self.is_paused();
        self.inner.status.update(|s| {
            s.pending_count = pending;
            s.failed_count = failed;
            s.is_processing = processing;
            s.is_paused = paused;
        });
    }
}

async fn wait_until_offline(online: &mut watch::Receiver<bool>) {
    loop {
        if !*online.borrow_and_update() {
            return;
        }
        if online.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, WordUpsert};
    use crate::testing::MockRemote;
    use crate::vocab::Word;
    use serde_json::json;

    fn manual_config() -> QueueConfig {
        QueueConfig {
            auto_drain: false,
            ..Default::default()
        }
    }

    fn open_queue(store: &LocalStore, remote: &Arc<MockRemote>, connectivity: &Connectivity, config: QueueConfig) -> OperationQueue {
        OperationQueue::new(store.clone(), remote.clone(), connectivity.clone(), config).unwrap()
    }

    fn progress_op(user: &str, word_id: i64) -> serde_json::Value {
        json!({"user_id": user, "word_id": word_id, "is_learned": true})
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let cap = Duration::from_secs(300);
        let delays: Vec<u64> = (1..=5).map(|n| backoff_delay(n, cap).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
        assert_eq!(backoff_delay(20, cap), cap);
        assert_eq!(backoff_delay(200, cap), cap);
    }

    #[tokio::test]
    async fn test_malformed_operation_fails_without_network() {
        let remote = MockRemote::new();
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());

        queue
            .enqueue(OperationKind::UpsertProgress, json!({"word_id": 42, "is_learned": true}))
            .unwrap();

        let report = queue.drain().await;
        assert_eq!(report.failed, 1);
        assert_eq!(queue.status().failed_count, 1);
        assert_eq!(queue.status().pending_count, 0);

        for _ in 0..4 {
            queue.drain().await;
        }
        assert_eq!(queue.status().failed_count, 1);
        assert_eq!(remote.calls("upsert_progress"), 0);
        assert!(queue.status().last_error.unwrap().contains("user_id"));
    }

    #[tokio::test]
    async fn test_listener_sees_every_queue_transition() {
        let remote = MockRemote::new();
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _subscription =
            queue.listen(move |status| sink.lock().unwrap().push((status.pending_count, status.is_processing)));

        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 1)).unwrap();
        queue.drain().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&(0, false)));
        assert!(seen.contains(&(1, false)));
        assert!(seen.contains(&(1, true)));
        assert_eq!(seen.last(), Some(&(0, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_park() {
        let remote = MockRemote::new();
        remote.fail_always("upsert_progress", RemoteError::Network("unreachable".to_string()));
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());
        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 1)).unwrap();

        let started = tokio::time::Instant::now();
        let report = queue.drain().await;
        let elapsed = started.elapsed();

        assert_eq!(remote.calls("upsert_progress"), 5);
        assert_eq!(report.retried, 4);
        assert_eq!(report.failed, 1);
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        assert_eq!(queue.failed_operations()[0].retry_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_head_blocks_later_operations() {
        let remote = MockRemote::new();
        remote.fail_next(
            "upsert_progress",
            1,
            RemoteError::Server {
                status: 503,
                message: "busy".to_string(),
            },
        );
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());
        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 1)).unwrap();
        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 2)).unwrap();

        let report = queue.drain().await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retried, 1);
        assert_eq!(
            remote.call_log(),
            vec!["upsert_progress:u:1", "upsert_progress:u:1", "upsert_progress:u:2"]
        );
    }

    #[tokio::test]
    async fn test_backlog_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.db");
        let remote = MockRemote::new();
        let offline = Connectivity::new(false);

        {
            let store = LocalStore::open(&path).unwrap();
            let queue = open_queue(&store, &remote, &offline, manual_config());
            for word_id in 1..=3 {
                queue.enqueue(OperationKind::UpsertProgress, progress_op("u", word_id)).unwrap();
            }
            assert_eq!(queue.drain().await.stop, DrainStop::Offline);
        }

        let store = LocalStore::open(&path).unwrap();
        let online = Connectivity::new(true);
        let queue = open_queue(&store, &remote, &online, manual_config());
        assert_eq!(queue.status().pending_count, 3);

        let report = queue.drain().await;
        assert_eq!(report.succeeded, 3);
        assert_eq!(
            remote.call_log(),
            vec!["upsert_progress:u:1", "upsert_progress:u:2", "upsert_progress:u:3"]
        );
        assert_eq!(queue.status().pending_count, 0);
    }

    #[tokio::test]
    async fn test_going_offline_mid_drain_stops_after_current_operation() {
        let remote = MockRemote::new();
        remote.hold();
        let store = LocalStore::open_in_memory().unwrap();
        let connectivity = Connectivity::new(true);
        let queue = open_queue(&store, &remote, &connectivity, manual_config());
        for word_id in 1..=3 {
            queue.enqueue(OperationKind::UpsertProgress, progress_op("u", word_id)).unwrap();
        }

        let draining = tokio::spawn({
            let queue = queue.clone();
            async move { queue.drain().await }
        });
        wait_for(|| remote.calls("upsert_progress") == 1).await;
        assert!(queue.status().is_processing);

        connectivity.set_online(false);
        remote.release();
        let report = draining.await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.stop, DrainStop::Offline);
        assert_eq!(queue.status().pending_count, 2);
        assert!(!queue.status().is_processing);

        let watcher = queue.start();
        connectivity.set_online(true);
        wait_for(|| queue.status().pending_count == 0 && !queue.status().is_processing).await;
        assert_eq!(remote.calls("upsert_progress"), 3);
        watcher.abort();
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_skipped() {
        let remote = MockRemote::new();
        remote.hold();
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());
        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 1)).unwrap();

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.drain().await }
        });
        wait_for(|| remote.calls("upsert_progress") == 1).await;

        assert_eq!(queue.drain().await.stop, DrainStop::AlreadyRunning);
        remote.release();
        assert_eq!(first.await.unwrap().succeeded, 1);
        assert_eq!(remote.calls("upsert_progress"), 1);
    }

    #[tokio::test]
    async fn test_enqueue_drains_automatically_when_online() {
        let remote = MockRemote::new();
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), QueueConfig::default());

        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 7)).unwrap();

        wait_for(|| queue.status().pending_count == 0 && !queue.status().is_processing).await;
        assert!(remote.progress("u", 7).is_some());
        assert!(queue.status().last_processed_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_failed_requeues_in_place() {
        let remote = MockRemote::new();
        remote.fail_always(
            "upsert_progress",
            RemoteError::Rejected {
                status: 400,
                message: "bad row".to_string(),
            },
        );
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());
        for word_id in 1..=3 {
            queue.enqueue(OperationKind::UpsertProgress, progress_op("u", word_id)).unwrap();
        }

        assert_eq!(queue.drain().await.failed, 3);
        assert_eq!(remote.calls("upsert_progress"), 3);

        remote.clear_failures();
        assert_eq!(queue.retry_failed().unwrap(), 3);
        assert_eq!(queue.status().pending_count, 3);
        assert_eq!(queue.drain().await.succeeded, 3);
        assert_eq!(remote.progress_count(), 3);
    }

    #[tokio::test]
    async fn test_clear_failed_keeps_pending() {
        let remote = MockRemote::new();
        remote.fail_always(
            "upsert_progress",
            RemoteError::Rejected {
                status: 409,
                message: "conflict".to_string(),
            },
        );
        let store = LocalStore::open_in_memory().unwrap();
        let connectivity = Connectivity::new(true);
        let queue = open_queue(&store, &remote, &connectivity, manual_config());
        for word_id in 1..=3 {
            queue.enqueue(OperationKind::UpsertProgress, progress_op("u", word_id)).unwrap();
        }
        queue.drain().await;

        connectivity.set_online(false);
        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 4)).unwrap();
        queue.enqueue(OperationKind::UpsertProgress, progress_op("u", 5)).unwrap();

        assert_eq!(queue.clear_failed().unwrap(), 3);
        let status = queue.status();
        assert_eq!(status.failed_count, 0);
        assert_eq!(status.pending_count, 2);
    }

    #[tokio::test]
    async fn test_paused_queue_does_not_drain() {
        let remote = MockRemote::new();
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());
        queue.enqueue(OperationKind::DeleteWord, json!({"id": 3})).unwrap();

        queue.pause();
        assert_eq!(queue.drain().await.stop, DrainStop::Paused);
        assert_eq!(remote.calls("delete_word"), 0);
        assert!(queue.status().is_paused);

        queue.resume();
        assert_eq!(queue.drain().await.succeeded, 1);
        assert_eq!(remote.calls("delete_word"), 1);
    }

    #[tokio::test]
    async fn test_new_word_gets_remote_id_before_its_progress_is_pushed() {
        let remote = MockRemote::new();
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());

        let word = Word::new("abate");
        store.put_word(&word).unwrap();
        queue
            .enqueue(OperationKind::UpsertWord, serde_json::to_value(WordUpsert::from(&word)).unwrap())
            .unwrap();
        queue
            .enqueue(
                OperationKind::UpsertProgress,
                json!({"user_id": "u", "word": "abate", "is_reserved": true}),
            )
            .unwrap();

        let report = queue.drain().await;
        assert_eq!(report.succeeded, 2);

        let remote_id = remote.word("abate").unwrap().id;
        assert_eq!(store.get_word("abate").unwrap().unwrap().remote_id, Some(remote_id));
        assert_eq!(remote.progress("u", remote_id).unwrap().is_reserved, Some(true));
    }

    #[tokio::test]
    async fn test_delete_of_word_unknown_locally_asks_remote() {
        let remote = MockRemote::new();
        remote.insert_word(crate::remote::RemoteWord::bare(9, "abate"));
        let store = LocalStore::open_in_memory().unwrap();
        let queue = open_queue(&store, &remote, &Connectivity::new(true), manual_config());

        queue.enqueue(OperationKind::DeleteWord, json!({"word": "abate"})).unwrap();
        queue.enqueue(OperationKind::DeleteWord, json!({"word": "never-synced"})).unwrap();

        let report = queue.drain().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(remote.calls("delete_word"), 1);
        assert!(remote.word("abate").is_none());
    }
}
