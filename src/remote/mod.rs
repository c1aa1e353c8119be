//! Boundary to the shared remote store.
//!
//! The sync engine only talks to the remote store through [`RemoteStore`], so
//! any backend offering paginated list, upsert and delete calls can be used.

pub mod models;
pub mod rest;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use models::{
    ProgressUpsert, RemoteProgress, RemoteWord, WordIdentity, WordStory, WordUpsert,
};
pub use rest::RestClient;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Rejected by remote store: {status} - {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether retrying the same request later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Timeout(_) | RemoteError::Server { .. }
        )
    }

    /// Classify an HTTP status that is not a success
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            408 | 429 | 500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::Rejected { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Operations the sync engine needs from the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Page of words ordered by id, starting at `offset`
    async fn list_words(&self, offset: usize, limit: usize) -> Result<Vec<RemoteWord>>;

    /// Page of one user's progress rows ordered by word id
    async fn list_progress(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RemoteProgress>>;

    /// Insert or update a word keyed by its natural key; returns the stored row
    async fn upsert_word(&self, word: &WordUpsert) -> Result<RemoteWord>;

    async fn delete_word(&self, id: i64) -> Result<()>;

    /// Insert or update progress keyed by `(user_id, word_id)`
    async fn upsert_progress(&self, progress: &ProgressUpsert) -> Result<()>;

    async fn upsert_progress_batch(&self, rows: &[ProgressUpsert]) -> Result<()> {
        for row in rows {
            self.upsert_progress(row).await?;
        }
        Ok(())
    }

    async fn delete_progress(&self, user_id: &str, word_id: i64) -> Result<()>;

    /// Fetch only the story field for the given natural keys
    async fn fetch_stories(&self, keys: &[String]) -> Result<Vec<WordStory>>;

    /// Resolve natural keys to remote ids; unknown keys are omitted
    async fn resolve_word_ids(&self, keys: &[String]) -> Result<HashMap<String, i64>>;
}

/// Run a remote call with an upper bound on its duration.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}
