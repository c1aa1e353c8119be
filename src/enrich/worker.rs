use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use super::{EnrichError, Enricher};
use crate::store::{LocalStore, META_ENRICH_CURSOR};
use crate::vocab::{VocabService, Word};

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Words fetched per batch
    pub batch_size: usize,
    /// Enricher calls in flight at once
    pub concurrency: usize,
    /// Stop after this many batches; `None` runs until no word lacks a story
    pub max_batches: Option<usize>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            concurrency: 4,
            max_batches: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentReport {
    pub enriched: usize,
    pub failed: usize,
    pub batches: usize,
    /// Last key processed, if the run stopped before the end
    pub cursor: Option<String>,
    /// Every word lacking a story was visited
    pub finished: bool,
    pub paused: bool,
}

/// Walks words without a story and fills them in through an [`Enricher`].
///
/// Each enriched word is written through [`VocabService::save_word`], so it is
/// stored locally and queued for the remote store in one step.
pub struct EnrichmentWorker {
    store: LocalStore,
    vocab: VocabService,
    enricher: Arc<dyn Enricher>,
    config: EnrichmentConfig,
    paused: AtomicBool,
}

impl EnrichmentWorker {
    pub fn new(
        store: LocalStore,
        vocab: VocabService,
        enricher: Arc<dyn Enricher>,
        config: EnrichmentConfig,
    ) -> Self {
        Self {
            store,
            vocab,
            enricher,
            config,
            paused: AtomicBool::new(false),
        }
    }

    pub fn with_max_batches(mut self, max_batches: Option<usize>) -> Self {
        self.config.max_batches = max_batches;
        self
    }

    /// Stop after the batch in progress
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Run batches from the persisted cursor until done, paused, or the batch
    /// limit is reached.
    pub async fn run(&self) -> Result<EnrichmentReport, EnrichError> {
        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.concurrency.max(1);
        let mut cursor: Option<String> = self.store.get_meta(META_ENRICH_CURSOR)?;
        let mut report = EnrichmentReport::default();

        if let Some(key) = &cursor {
            log::info!("Enrichment: resuming after '{}'", key);
        }

        loop {
            if self.is_paused() {
                report.paused = true;
                break;
            }
            if self.config.max_batches.is_some_and(|max| report.batches >= max) {
                break;
            }

            let batch = self.store.words_missing_story(cursor.as_deref(), batch_size)?;
            let Some(last) = batch.last() else {
                report.finished = true;
                break;
            };
            let last_key = last.key.clone();
            let batch_len = batch.len();

            let enricher = &self.enricher;
            let results: Vec<(Word, Result<String, EnrichError>)> = stream::iter(batch)
                .map(|word| async move {
                    let story = enricher.story_for(&word).await;
                    (word, story)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (mut word, story) in results {
                match story {
                    Ok(story) if !story.trim().is_empty() => {
                        word.story = Some(story);
                        self.vocab.save_word(&word)?;
                        report.enriched += 1;
                    }
                    Ok(_) => {
                        log::warn!("Enrichment: empty story for '{}'", word.key);
                        report.failed += 1;
                    }
                    Err(e) => {
                        log::warn!("Enrichment: '{}' failed: {}", word.key, e);
                        report.failed += 1;
                    }
                }
            }

            self.store.set_meta(META_ENRICH_CURSOR, &last_key)?;
            cursor = Some(last_key);
            report.batches += 1;
            log::debug!("Enrichment: batch {} done ({} words)", report.batches, batch_len);

            if batch_len < batch_size {
                report.finished = true;
                break;
            }
        }

        if report.finished {
            // Failed words get another chance on the next run
            self.store.delete_meta(META_ENRICH_CURSOR)?;
            cursor = None;
        }
        report.cursor = cursor;

        log::info!(
            "Enrichment: {} enriched, {} failed in {} batch(es)",
            report.enriched,
            report.failed,
            report.batches
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{OperationKind, OperationQueue, QueueConfig};
    use crate::sync::Connectivity;
    use crate::testing::MockRemote;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeEnricher {
        failing: HashSet<String>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Enricher for FakeEnricher {
        async fn story_for(&self, word: &Word) -> Result<String, EnrichError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&word.key) {
                return Err(EnrichError::Generation("model unavailable".to_string()));
            }
            Ok(format!("story of {}", word.key))
        }
    }

    struct Fixture {
        store: LocalStore,
        queue: OperationQueue,
        vocab: VocabService,
    }

    fn fixture(words: usize) -> Fixture {
        let store = LocalStore::open_in_memory().unwrap();
        let queue = OperationQueue::new(
            store.clone(),
            MockRemote::new(),
            Connectivity::new(false),
            QueueConfig::default(),
        )
        .unwrap();
        let vocab = VocabService::new(store.clone(), queue.clone(), "u");
        let rows: Vec<Word> = (0..words).map(|i| Word::new(&format!("word{i:02}"))).collect();
        store.put_words(&rows).unwrap();
        Fixture { store, queue, vocab }
    }

    fn worker(fx: &Fixture, enricher: Arc<FakeEnricher>, config: EnrichmentConfig) -> EnrichmentWorker {
        EnrichmentWorker::new(fx.store.clone(), fx.vocab.clone(), enricher, config)
    }

    #[tokio::test]
    async fn test_enriches_every_word_in_batches() {
        let fx = fixture(7);
        let enricher = Arc::new(FakeEnricher::default());
        let config = EnrichmentConfig {
            batch_size: 3,
            ..Default::default()
        };

        let report = worker(&fx, enricher.clone(), config).run().await.unwrap();

        assert_eq!(report.enriched, 7);
        assert_eq!(report.batches, 3);
        assert!(report.finished);
        assert!(fx.store.words_missing_story(None, 10).unwrap().is_empty());
        assert_eq!(
            fx.store.get_word("word04").unwrap().unwrap().story.as_deref(),
            Some("story of word04")
        );

        let pending = fx.queue.pending_operations();
        assert_eq!(pending.len(), 7);
        assert!(pending.iter().all(|op| op.kind == OperationKind::UpsertWord));
        assert!(fx.store.get_meta::<String>(META_ENRICH_CURSOR).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resumes_after_persisted_cursor() {
        let fx = fixture(7);
        let enricher = Arc::new(FakeEnricher::default());
        let first = EnrichmentConfig {
            batch_size: 3,
            max_batches: Some(1),
            ..Default::default()
        };

        let report = worker(&fx, enricher.clone(), first).run().await.unwrap();
        assert_eq!(report.enriched, 3);
        assert!(!report.finished);
        assert_eq!(
            fx.store.get_meta::<String>(META_ENRICH_CURSOR).unwrap().as_deref(),
            Some("word02")
        );

        let rest = EnrichmentConfig {
            batch_size: 3,
            ..Default::default()
        };
        let report = worker(&fx, enricher.clone(), rest).run().await.unwrap();
        assert_eq!(report.enriched, 4);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_failed_words_keep_missing_story() {
        let fx = fixture(4);
        let enricher = Arc::new(FakeEnricher {
            failing: HashSet::from(["word01".to_string()]),
            ..Default::default()
        });

        let report = worker(&fx, enricher, EnrichmentConfig::default()).run().await.unwrap();

        assert_eq!(report.enriched, 3);
        assert_eq!(report.failed, 1);
        let missing: Vec<String> = fx
            .store
            .words_missing_story(None, 10)
            .unwrap()
            .into_iter()
            .map(|w| w.key)
            .collect();
        assert_eq!(missing, vec!["word01"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fx = fixture(12);
        let enricher = Arc::new(FakeEnricher::default());
        let config = EnrichmentConfig {
            batch_size: 12,
            concurrency: 2,
            max_batches: None,
        };

        worker(&fx, enricher.clone(), config).run().await.unwrap();

        assert!(enricher.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_paused_worker_does_nothing() {
        let fx = fixture(3);
        let enricher = Arc::new(FakeEnricher::default());
        let worker = worker(&fx, enricher.clone(), EnrichmentConfig::default());

        worker.pause();
        let report = worker.run().await.unwrap();
        assert!(report.paused);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);

        worker.resume();
        assert_eq!(worker.run().await.unwrap().enriched, 3);
    }
}
