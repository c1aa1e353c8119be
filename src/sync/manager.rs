use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use super::config::{SyncConfig, SyncKind, SyncOutcome, SyncResult, SyncState, SyncStatus};
use super::connectivity::Connectivity;
use super::notify::{StatusFeed, Subscription};
use crate::remote::{with_timeout, ProgressUpsert, RemoteError, RemoteStore};
use crate::store::{LocalStore, StoreError, META_LAST_SYNC};

#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote call failed; rows merged before it stay merged
    #[error("Sync failed after {applied} row(s): {source}")]
    Partial {
        applied: usize,
        #[source]
        source: RemoteError,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Device is offline")]
    Offline,
    #[error("Sync not configured: {0}")]
    NotConfigured(&'static str),
}

impl SyncError {
    /// Rows applied before the failure
    pub fn applied(&self) -> usize {
        match self {
            SyncError::Partial { applied, .. } => *applied,
            _ => 0,
        }
    }
}

/// Pulls remote state into the local store and pushes local progress back.
///
/// All entry points share one non-reentrant lock: a call made while another
/// sync is running returns [`SyncOutcome::Skipped`] without doing anything.
/// [`SyncManager::pause`] is checked before every page or chunk.
pub struct SyncManager {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    config: SyncConfig,
    lock: Mutex<()>,
    paused: AtomicBool,
    status: StatusFeed<SyncStatus>,
}

impl SyncManager {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Self {
        let last_sync = store
            .get_meta::<DateTime<Utc>>(META_LAST_SYNC)
            .unwrap_or_else(|e| {
                log::warn!("Sync: could not read last sync time: {}", e);
                None
            });

        Self {
            store,
            remote,
            connectivity,
            config,
            lock: Mutex::new(()),
            paused: AtomicBool::new(false),
            status: StatusFeed::new(SyncStatus {
                last_sync,
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Pull every word and every progress row of the configured user.
    pub async fn full_sync(&self) -> Result<SyncOutcome, SyncError> {
        self.run_exclusive(SyncKind::Full).await
    }

    /// Pull only the progress rows of the configured user.
    pub async fn sync_progress(&self) -> Result<SyncOutcome, SyncError> {
        self.run_exclusive(SyncKind::Progress).await
    }

    /// Fetch stories for local words that have none.
    pub async fn sync_missing_stories(&self) -> Result<SyncOutcome, SyncError> {
        self.run_exclusive(SyncKind::MissingStories).await
    }

    /// Push every local progress row with state to the remote store.
    pub async fn push_local_to_cloud(&self) -> Result<SyncOutcome, SyncError> {
        self.run_exclusive(SyncKind::PushLocal).await
    }

    /// Pull everything like [`SyncManager::full_sync`], then delete mirrored
    /// words the remote store no longer lists. Progress rows and words created
    /// on this device are never deleted.
    pub async fn force_refresh(&self) -> Result<SyncOutcome, SyncError> {
        self.run_exclusive(SyncKind::ForceRefresh).await
    }

    async fn run_exclusive(&self, kind: SyncKind) -> Result<SyncOutcome, SyncError> {
        let Ok(_guard) = self.lock.try_lock() else {
            log::info!("Sync: {} skipped, another sync is running", kind.label());
            return Ok(SyncOutcome::Skipped);
        };

        let started = Instant::now();
        let result = match self.begin(kind) {
            Ok(()) => self.run(kind).await,
            Err(e) => Err(e),
        };
        self.finish(kind, started, result)
    }

    async fn run(&self, kind: SyncKind) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::new(kind);
        match kind {
            SyncKind::Full => {
                self.pull_words(&mut result).await?;
                self.pull_progress(&mut result).await?;
            }
            SyncKind::ForceRefresh => {
                let listed = self.pull_words(&mut result).await?;
                self.pull_progress(&mut result).await?;
                // A partial listing would prune words that still exist
                if !result.paused {
                    result.pruned = self.store.prune_unlisted_words(&listed)?;
                }
            }
            SyncKind::Progress => {
                self.require_user()?;
                self.pull_progress(&mut result).await?;
            }
            SyncKind::MissingStories => self.pull_missing_stories(&mut result).await?,
            SyncKind::PushLocal => self.push_progress(&mut result).await?,
        }
        Ok(result)
    }

    fn begin(&self, kind: SyncKind) -> Result<(), SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        log::info!("Sync: {} started", kind.label());
        self.status.update(|s| {
            s.status = SyncState::Syncing;
            s.error = None;
            s.current_operation = Some(kind.label().to_string());
        });
        Ok(())
    }

    fn finish(
        &self,
        kind: SyncKind,
        started: Instant,
        result: Result<SyncResult, SyncError>,
    ) -> Result<SyncOutcome, SyncError> {
        match result {
            Ok(mut result) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                if result.paused {
                    let notice = result.summary();
                    log::info!("Sync: {}", notice);
                    self.status.update(|s| {
                        s.status = SyncState::Idle;
                        s.current_operation = None;
                        s.notice = Some(notice);
                    });
                    return Ok(SyncOutcome::Completed(result));
                }
                let now = Utc::now();
                if let Err(e) = self.store.set_meta(META_LAST_SYNC, &now) {
                    log::warn!("Sync: could not persist last sync time: {}", e);
                }
                let notice = result.summary();
                log::info!("Sync: {} ({} ms)", notice, result.duration_ms);
                self.status.update(|s| {
                    s.status = SyncState::Success;
                    s.last_sync = Some(now);
                    s.error = None;
                    s.current_operation = None;
                    s.notice = Some(notice);
                });
                Ok(SyncOutcome::Completed(result))
            }
            Err(e) => {
                log::warn!("Sync: {} failed: {}", kind.label(), e);
                let state = match e {
                    SyncError::Offline => SyncState::Offline,
                    _ => SyncState::Error,
                };
                let notice = match &e {
                    SyncError::Partial { applied, .. } => {
                        format!("{} failed after {} rows", kind.label(), applied)
                    }
                    other => format!("{} failed: {}", kind.label(), other),
                };
                self.status.update(|s| {
                    s.status = state;
                    s.error = Some(e.to_string());
                    s.current_operation = None;
                    s.notice = Some(notice);
                });
                Err(e)
            }
        }
    }

    fn require_user(&self) -> Result<&str, SyncError> {
        if self.config.user_id.is_empty() {
            return Err(SyncError::NotConfigured("user id is not set"));
        }
        Ok(&self.config.user_id)
    }

    fn note_progress(&self, message: String) {
        self.status.update(|s| s.current_operation = Some(message));
    }

    /// Stop after the page or chunk in progress. Rows merged so far stay
    /// merged and the run completes with [`SyncResult::paused`] set.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        log::info!("Sync: paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        log::info!("Sync: resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn stop_requested(&self, result: &mut SyncResult) -> bool {
        if self.is_paused() {
            result.paused = true;
        }
        result.paused
    }

    /// Page through the remote words table, merging each page as it arrives.
    /// Returns the remote ids of every listed word.
    async fn pull_words(&self, result: &mut SyncResult) -> Result<HashSet<i64>, SyncError> {
        let page_size = self.config.page_size.max(1);
        let mut offset = 0;
        let mut listed = HashSet::new();

        loop {
            if self.stop_requested(result) {
                break;
            }
            let page = with_timeout(self.config.request_timeout, self.remote.list_words(offset, page_size))
                .await
                .map_err(|source| SyncError::Partial {
                    applied: result.words.applied(),
                    source,
                })?;
            let stats = self.store.merge_remote_words(&page, Utc::now())?;
            result.words.absorb(stats);
            listed.extend(page.iter().map(|w| w.id));
            log::debug!("Sync: merged words {}..{}", offset, offset + page.len());
            self.note_progress(format!("Words: {} fetched", result.words.applied()));

            if page.len() < page_size {
                break;
            }
            offset += page.len();
        }
        Ok(listed)
    }

    async fn pull_progress(&self, result: &mut SyncResult) -> Result<(), SyncError> {
        let Ok(user_id) = self.require_user() else {
            log::debug!("Sync: no user configured, skipping progress pull");
            return Ok(());
        };
        let page_size = self.config.page_size.max(1);
        let mut offset = 0;

        loop {
            if self.stop_requested(result) {
                break;
            }
            let page = with_timeout(
                self.config.request_timeout,
                self.remote.list_progress(user_id, offset, page_size),
            )
            .await
            .map_err(|source| SyncError::Partial {
                applied: result.words.applied() + result.progress.applied(),
                source,
            })?;
            let stats = self.store.merge_remote_progress(&page, Utc::now())?;
            result.progress.absorb(stats);
            self.note_progress(format!("Progress: {} fetched", result.progress.applied()));

            if page.len() < page_size {
                break;
            }
            offset += page.len();
        }
        Ok(())
    }

    /// Ask the remote store for the story field of words lacking one.
    async fn pull_missing_stories(&self, result: &mut SyncResult) -> Result<(), SyncError> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut after: Option<String> = None;

        loop {
            if self.stop_requested(result) {
                break;
            }
            let batch = self.store.words_missing_story(after.as_deref(), chunk_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.key.clone());

            let keys: Vec<String> = batch.iter().map(|w| w.key.clone()).collect();
            let stories = with_timeout(self.config.request_timeout, self.remote.fetch_stories(&keys))
                .await
                .map_err(|source| SyncError::Partial {
                    applied: result.stories_patched,
                    source,
                })?;

            for entry in stories {
                let Some(story) = entry.story.filter(|s| !s.trim().is_empty()) else {
                    continue;
                };
                if self.store.patch_story(&entry.word, &story)? {
                    result.stories_patched += 1;
                }
            }

            if batch.len() < chunk_size {
                break;
            }
        }
        Ok(())
    }

    /// Resolve natural keys to remote ids chunk by chunk and upsert the rows.
    /// Rows whose word does not exist remotely yet are skipped.
    async fn push_progress(&self, result: &mut SyncResult) -> Result<(), SyncError> {
        let user_id = self.require_user()?;
        let rows: Vec<_> = self
            .store
            .list_progress(user_id)?
            .into_iter()
            .filter(|p| p.has_state())
            .collect();
        let chunk_size = self.config.chunk_size.max(1);
        let timeout = self.config.request_timeout;

        for chunk in rows.chunks(chunk_size) {
            if self.stop_requested(result) {
                break;
            }
            let keys: Vec<String> = chunk.iter().map(|p| p.word_key.clone()).collect();
            let mut ids = self.store.remote_ids_for(&keys)?;

            let unknown: Vec<String> = keys.iter().filter(|k| !ids.contains_key(*k)).cloned().collect();
            if !unknown.is_empty() {
                let resolved = with_timeout(timeout, self.remote.resolve_word_ids(&unknown))
                    .await
                    .map_err(|source| SyncError::Partial {
                        applied: result.progress_pushed,
                        source,
                    })?;
                for (key, id) in &resolved {
                    self.store.assign_remote_id(key, *id)?;
                }
                ids.extend(resolved);
            }

            let mut upserts = Vec::with_capacity(chunk.len());
            let mut pushed_keys = Vec::with_capacity(chunk.len());
            for progress in chunk {
                match ids.get(&progress.word_key) {
                    Some(id) => {
                        upserts.push(ProgressUpsert::from_progress(progress, *id));
                        pushed_keys.push(progress.word_key.clone());
                    }
                    None => {
                        log::info!("Sync: '{}' has no remote word yet, skipping", progress.word_key);
                        result.skipped += 1;
                    }
                }
            }
            if upserts.is_empty() {
                continue;
            }

            with_timeout(timeout, self.remote.upsert_progress_batch(&upserts))
                .await
                .map_err(|source| SyncError::Partial {
                    applied: result.progress_pushed,
                    source,
                })?;
            self.store.mark_progress_synced(user_id, &pushed_keys, Utc::now())?;
            result.progress_pushed += upserts.len();
            self.note_progress(format!("Pushed {} of {}", result.progress_pushed, rows.len()));
        }
        Ok(())
    }

    pub fn is_syncing(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.status.current().last_sync
    }

    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Call `listener` with the current status now and after every change
    pub fn listen<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(SyncStatus) + Send + 'static,
    {
        self.status.listen(listener)
    }
}
