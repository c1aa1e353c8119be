//! Auxiliary records and query types for the local store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Filter for progress rows. Unset fields do not constrain the query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressQuery {
    pub user_id: Option<String>,
    pub learned: Option<bool>,
    pub reserved: Option<bool>,
    /// Only rows with a next review at or before this instant
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ProgressQuery {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    /// Learned words whose next review is due at `now`
    pub fn due_reviews(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            learned: Some(true),
            due_before: Some(now),
            ..Self::for_user(user_id)
        }
    }

    pub fn learned(mut self, learned: bool) -> Self {
        self.learned = Some(learned);
        self
    }

    pub fn reserved(mut self, reserved: bool) -> Self {
        self.reserved = Some(reserved);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A generated quiz cached for offline replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    pub id: Uuid,
    pub user_id: String,
    pub word_keys: Vec<String>,
    /// Opaque quiz content produced by the quiz layer
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn new(user_id: &str, word_keys: Vec<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            word_keys,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Cached pronunciation audio for a word
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub key: String,
    pub mime: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub words: usize,
    pub progress: usize,
    pub quiz_sessions: usize,
    pub audio_clips: usize,
}

/// Counts produced by a bulk merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub kept_local: usize,
}

impl MergeStats {
    /// Rows processed, whether or not they changed anything
    pub fn applied(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.kept_local
    }

    pub fn absorb(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.kept_local += other.kept_local;
    }
}
