use chrono::Utc;
use serde_json::json;

use super::algorithm::{apply_review, ui_rating_to_quality, ReviewSchedule};
use super::models::{normalize_key, Progress, Word, WordDetails};
use crate::queue::{OperationKind, OperationQueue, ProgressPayload};
use crate::remote::WordUpsert;
use crate::store::{LocalStore, ProgressQuery, Result};

/// Usage counter bumped on every recorded review
pub const COUNTER_REVIEWS: &str = "reviews";

/// Entry point for user-initiated mutations.
///
/// Every write lands in the local store first; only once it has committed is
/// the matching remote operation enqueued. If the enqueue fails the local
/// write is undone before the error is returned, so a storage failure means
/// the mutation did not happen at all.
#[derive(Clone)]
pub struct VocabService {
    store: LocalStore,
    queue: OperationQueue,
    user_id: String,
}

impl VocabService {
    pub fn new(store: LocalStore, queue: OperationQueue, user_id: &str) -> Self {
        Self {
            store,
            queue,
            user_id: user_id.to_string(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn get_word(&self, word: &str) -> Result<Option<Word>> {
        self.store.get_word(word)
    }

    pub fn get_progress(&self, word: &str) -> Result<Option<Progress>> {
        self.store.get_progress(&self.user_id, word)
    }

    /// Words due for review now, soonest first
    pub fn due_reviews(&self, limit: usize) -> Result<Vec<Progress>> {
        self.store
            .query_progress(&ProgressQuery::due_reviews(&self.user_id, Utc::now()).limit(limit))
    }

    pub fn reserved_words(&self) -> Result<Vec<Progress>> {
        self.store
            .query_progress(&ProgressQuery::for_user(&self.user_id).reserved(true))
    }

    /// Add a word created on this device. An existing word is returned as is.
    pub fn add_word(&self, word: &str, details: WordDetails) -> Result<Word> {
        if let Some(existing) = self.store.get_word(word)? {
            return Ok(existing);
        }
        let created = Word::with_details(word, details);
        self.save_word(&created)?;
        log::info!("Vocab: added '{}'", created.key);
        Ok(created)
    }

    /// Store a word and queue its remote upsert
    pub fn save_word(&self, word: &Word) -> Result<()> {
        let previous = self.store.get_word(&word.key)?;
        self.store.put_word(word)?;
        let queued = serde_json::to_value(WordUpsert::from(word))
            .map_err(Into::into)
            .and_then(|payload| self.queue.enqueue(OperationKind::UpsertWord, payload));
        if let Err(e) = queued {
            let undone = match previous {
                Some(previous) => self.store.put_word(&previous),
                None => self.store.delete_word(&word.key).map(drop),
            };
            self.undone(&word.key, undone);
            return Err(e);
        }
        Ok(())
    }

    /// Administrative removal of a word and this user's progress on it
    pub fn remove_word(&self, word: &str) -> Result<bool> {
        let key = normalize_key(word);
        let Some(previous) = self.store.get_word(&key)? else {
            self.store.delete_progress(&self.user_id, &key)?;
            return Ok(false);
        };
        let progress = self.store.get_progress(&self.user_id, &key)?;
        self.store.delete_progress(&self.user_id, &key)?;
        self.store.delete_word(&key)?;

        let queued = self.queue.enqueue(
            OperationKind::DeleteWord,
            json!({ "id": previous.remote_id, "word": key }),
        );
        if let Err(e) = queued {
            let undone = self
                .store
                .put_word(&previous)
                .and_then(|()| self.restore_progress(&key, progress));
            self.undone(&key, undone);
            return Err(e);
        }
        Ok(true)
    }

    pub fn mark_learned(&self, word: &str) -> Result<Progress> {
        self.update(word, |p| p.mark_learned())
    }

    pub fn mark_reserved(&self, word: &str) -> Result<Progress> {
        self.update(word, |p| p.mark_reserved())
    }

    pub fn reset_flags(&self, word: &str) -> Result<Progress> {
        self.update(word, |p| p.clear_flags())
    }

    pub fn set_note(&self, word: &str, note: Option<&str>) -> Result<Progress> {
        let note = note.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
        self.update(word, move |p| {
            p.note = note;
            p.updated_at = Utc::now();
        })
    }

    pub fn set_custom_spelling(&self, word: &str, spelling: Option<&str>) -> Result<Progress> {
        let spelling = spelling.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        self.update(word, move |p| {
            p.custom_spelling = spelling;
            p.updated_at = Utc::now();
        })
    }

    /// Record a review with a UI rating (1-4: Again, Hard, Good, Easy)
    pub fn record_review(&self, word: &str, rating: i32) -> Result<ReviewSchedule> {
        let quality = ui_rating_to_quality(rating);
        let now = Utc::now();
        let mut schedule = None;
        let progress = self.update(word, |p| {
            schedule = Some(apply_review(p, quality, now));
        })?;
        self.store.increment_counter(COUNTER_REVIEWS, 1)?;

        Ok(schedule.unwrap_or(ReviewSchedule {
            interval_days: progress.interval_days,
            ease_factor: progress.ease_factor,
            next_review_at: progress.next_review_at.unwrap_or(now),
        }))
    }

    /// Drop all progress for a word. Returns whether there was any.
    pub fn reset_progress(&self, word: &str) -> Result<bool> {
        let key = normalize_key(word);
        let remote_id = self.store.get_word(&key)?.and_then(|w| w.remote_id);
        let Some(previous) = self.store.get_progress(&self.user_id, &key)? else {
            return Ok(false);
        };
        self.store.delete_progress(&self.user_id, &key)?;

        let queued = self.queue.enqueue(
            OperationKind::DeleteProgress,
            json!({ "user_id": self.user_id, "word_id": remote_id, "word": key }),
        );
        if let Err(e) = queued {
            let undone = self.store.put_progress(&previous);
            self.undone(&key, undone);
            return Err(e);
        }
        Ok(true)
    }

    fn update<F>(&self, word: &str, apply: F) -> Result<Progress>
    where
        F: FnOnce(&mut Progress),
    {
        let key = normalize_key(word);
        let previous = self.store.get_progress(&self.user_id, &key)?;
        let progress = self.store.update_progress(&self.user_id, &key, apply)?;
        if let Err(e) = self.enqueue_progress(&progress) {
            let undone = self.restore_progress(&key, previous);
            self.undone(&key, undone);
            return Err(e);
        }
        Ok(progress)
    }

    fn restore_progress(&self, key: &str, previous: Option<Progress>) -> Result<()> {
        match previous {
            Some(previous) => self.store.put_progress(&previous),
            None => self.store.delete_progress(&self.user_id, key).map(drop),
        }
    }

    fn undone(&self, key: &str, result: Result<()>) {
        match result {
            Ok(()) => log::warn!("Vocab: could not queue '{}', local change undone", key),
            Err(e) => log::error!("Vocab: could not undo local change to '{}': {}", key, e),
        }
    }

    fn enqueue_progress(&self, progress: &Progress) -> Result<()> {
        let word_id = self.store.get_word(&progress.word_key)?.and_then(|w| w.remote_id);
        let payload = ProgressPayload::from_progress(progress, word_id);
        self.queue
            .enqueue(OperationKind::UpsertProgress, serde_json::to_value(payload)?)?;
        Ok(())
    }
}
