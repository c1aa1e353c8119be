//! In-memory remote store used by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use crate::remote::{
    ProgressUpsert, RemoteError, RemoteProgress, RemoteStore, RemoteWord, Result, WordStory,
    WordUpsert,
};
use crate::vocab::normalize_key;

struct FailurePlan {
    skip: usize,
    remaining: Option<usize>,
    error: RemoteError,
}

#[derive(Default)]
struct MockState {
    words: BTreeMap<i64, RemoteWord>,
    progress: BTreeMap<(String, i64), RemoteProgress>,
    next_id: i64,
    calls: Vec<String>,
    failures: HashMap<&'static str, FailurePlan>,
}

/// Remote store backed by ordered maps, with call counters, failure
/// injection and an optional gate that holds calls until released.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remote holding `count` words named `word0000`, `word0001`, ... with ids from 1
    pub fn with_words(count: usize) -> Arc<Self> {
        let remote = Self::new();
        for i in 0..count {
            let mut row = RemoteWord::bare(i as i64 + 1, &format!("word{i:04}"));
            row.meanings = Some(vec![format!("meaning {i}")]);
            remote.insert_word(row);
        }
        remote
    }

    pub fn insert_word(&self, row: RemoteWord) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(row.id);
        state.words.insert(row.id, row);
    }

    pub fn insert_progress(&self, row: RemoteProgress) {
        let mut state = self.state.lock().unwrap();
        state.progress.insert((row.user_id.clone(), row.word_id), row);
    }

    pub fn word(&self, key: &str) -> Option<RemoteWord> {
        let state = self.state.lock().unwrap();
        state.words.values().find(|w| w.word == key).cloned()
    }

    pub fn word_count(&self) -> usize {
        self.state.lock().unwrap().words.len()
    }

    pub fn progress(&self, user_id: &str, word_id: i64) -> Option<RemoteProgress> {
        let state = self.state.lock().unwrap();
        state.progress.get(&(user_id.to_string(), word_id)).cloned()
    }

    pub fn progress_count(&self) -> usize {
        self.state.lock().unwrap().progress.len()
    }

    /// Number of calls made to `method`, failed ones included
    pub fn calls(&self, method: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .filter(|c| c.split(':').next() == Some(method))
            .count()
    }

    /// Every call in order, as `method:detail`
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fail_next(&self, method: &'static str, times: usize, error: RemoteError) {
        self.plan(method, 0, Some(times), error);
    }

    pub fn fail_always(&self, method: &'static str, error: RemoteError) {
        self.plan(method, 0, None, error);
    }

    /// Let `successes` calls through, then fail every following call
    pub fn fail_after(&self, method: &'static str, successes: usize, error: RemoteError) {
        self.plan(method, successes, None, error);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    fn plan(&self, method: &'static str, skip: usize, remaining: Option<usize>, error: RemoteError) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(method, FailurePlan { skip, remaining, error });
    }

    /// Hold every call until [`MockRemote::release`] is called
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    async fn enter(&self, method: &'static str, detail: String) -> Result<()> {
        self.state.lock().unwrap().calls.push(format!("{method}:{detail}"));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut state = self.state.lock().unwrap();
        let Some(plan) = state.failures.get_mut(method) else {
            return Ok(());
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        let error = plan.error.clone();
        match plan.remaining.as_mut() {
            Some(0) => return Ok(()),
            Some(n) => *n -= 1,
            None => {}
        }
        Err(error)
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn list_words(&self, offset: usize, limit: usize) -> Result<Vec<RemoteWord>> {
        self.enter("list_words", offset.to_string()).await?;
        let state = self.state.lock().unwrap();
        Ok(state.words.values().skip(offset).take(limit).cloned().collect())
    }

    async fn list_progress(&self, user_id: &str, offset: usize, limit: usize) -> Result<Vec<RemoteProgress>> {
        self.enter("list_progress", format!("{user_id}:{offset}")).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .progress
            .values()
            .filter(|p| p.user_id == user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_word(&self, word: &WordUpsert) -> Result<RemoteWord> {
        self.enter("upsert_word", word.word.clone()).await?;
        let mut state = self.state.lock().unwrap();
        let key = normalize_key(&word.word);
        let existing = state.words.values().find(|w| w.word == key).map(|w| w.id);
        let id = match existing {
            Some(id) => id,
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        let row = RemoteWord {
            id,
            word: key,
            part_of_speech: word.part_of_speech.clone(),
            meanings: Some(word.meanings.clone()),
            examples: Some(word.examples.clone()),
            synonyms: Some(word.synonyms.clone()),
            antonyms: Some(word.antonyms.clone()),
            inflections: word.inflections.clone(),
            story: word.story.clone(),
            frequency_rank: word.frequency_rank,
            list_rank: word.list_rank,
            list_id: word.list_id.clone(),
        };
        state.words.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_word(&self, id: i64) -> Result<()> {
        self.enter("delete_word", id.to_string()).await?;
        let mut state = self.state.lock().unwrap();
        state.words.remove(&id);
        state.progress.retain(|(_, word_id), _| *word_id != id);
        Ok(())
    }

    async fn upsert_progress(&self, progress: &ProgressUpsert) -> Result<()> {
        self.enter("upsert_progress", format!("{}:{}", progress.user_id, progress.word_id))
            .await?;
        let mut state = self.state.lock().unwrap();
        let word = state
            .words
            .get(&progress.word_id)
            .map(|w| w.word.clone())
            .unwrap_or_default();
        let row = RemoteProgress {
            user_id: progress.user_id.clone(),
            word_id: progress.word_id,
            word,
            is_learned: Some(progress.is_learned),
            is_reserved: Some(progress.is_reserved),
            next_review_at: Some(progress.next_review_at),
            interval: Some(progress.interval),
            ease_factor: Some(progress.ease_factor),
            note: Some(progress.note.clone()),
            custom_spelling: Some(progress.custom_spelling.clone()),
            learned_at: Some(progress.learned_at),
            reserved_at: Some(progress.reserved_at),
            updated_at: Some(Utc::now()),
        };
        state.progress.insert((progress.user_id.clone(), progress.word_id), row);
        Ok(())
    }

    async fn delete_progress(&self, user_id: &str, word_id: i64) -> Result<()> {
        self.enter("delete_progress", format!("{user_id}:{word_id}")).await?;
        let mut state = self.state.lock().unwrap();
        state.progress.remove(&(user_id.to_string(), word_id));
        Ok(())
    }

    async fn fetch_stories(&self, keys: &[String]) -> Result<Vec<WordStory>> {
        self.enter("fetch_stories", keys.len().to_string()).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .words
            .values()
            .filter(|w| keys.contains(&w.word) && w.story.is_some())
            .map(|w| WordStory {
                word: w.word.clone(),
                story: w.story.clone(),
            })
            .collect())
    }

    async fn resolve_word_ids(&self, keys: &[String]) -> Result<HashMap<String, i64>> {
        self.enter("resolve_word_ids", keys.len().to_string()).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .words
            .values()
            .filter(|w| keys.contains(&w.word))
            .map(|w| (w.word.clone(), w.id))
            .collect())
    }
}
