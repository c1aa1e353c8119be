//! Data models for words and per-user learning progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalise a source-language token into its natural key.
pub fn normalize_key(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Structured lexical payload for a word
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub meanings: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub antonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inflections: Option<String>,
}

/// A vocabulary entry mirrored from the remote catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    /// Natural key: the lowercase source-language token
    pub key: String,
    /// Remote-assigned id, fixed once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<i64>,
    #[serde(default)]
    pub details: WordDetails,
    /// Enrichment text (mnemonic story); absent until generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    /// Curated lists this word belongs to
    #[serde(default)]
    pub lists: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl Word {
    pub fn new(word: &str) -> Self {
        Self {
            key: normalize_key(word),
            remote_id: None,
            details: WordDetails::default(),
            story: None,
            frequency_rank: None,
            list_rank: None,
            list_id: None,
            lists: Vec::new(),
            synced_at: None,
        }
    }

    pub fn with_details(word: &str, details: WordDetails) -> Self {
        let mut w = Self::new(word);
        w.details = details;
        w
    }

    pub fn in_list(&self, list: &str) -> bool {
        self.lists.iter().any(|l| l == list)
    }
}

/// Default SM-2 ease factor
pub const DEFAULT_EASE_FACTOR: f32 = 2.5;

/// Learning state of one user for one word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub user_id: String,
    pub word_key: String,
    #[serde(default)]
    pub is_learned: bool,
    #[serde(default)]
    pub is_reserved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
    /// Current interval in days
    #[serde(default)]
    pub interval_days: i32,
    #[serde(default = "default_ease_factor")]
    pub ease_factor: f32,
    /// Reviews recorded on this device. Not part of the remote schema.
    #[serde(default)]
    pub review_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_spelling: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

fn default_ease_factor() -> f32 {
    DEFAULT_EASE_FACTOR
}

impl Progress {
    pub fn new(user_id: &str, word: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            word_key: normalize_key(word),
            is_learned: false,
            is_reserved: false,
            next_review_at: None,
            interval_days: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            review_count: 0,
            note: None,
            custom_spelling: None,
            learned_at: None,
            reserved_at: None,
            updated_at: Utc::now(),
            synced_at: None,
        }
    }

    pub fn mark_learned(&mut self) {
        let now = Utc::now();
        self.is_learned = true;
        self.learned_at = Some(now);
        self.is_reserved = false;
        self.reserved_at = None;
        self.updated_at = now;
    }

    pub fn mark_reserved(&mut self) {
        let now = Utc::now();
        self.is_reserved = true;
        self.reserved_at = Some(now);
        self.is_learned = false;
        self.learned_at = None;
        self.updated_at = now;
    }

    pub fn clear_flags(&mut self) {
        self.is_learned = false;
        self.is_reserved = false;
        self.learned_at = None;
        self.reserved_at = None;
        self.updated_at = Utc::now();
    }

    /// Whether the word is due for review at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at.map_or(false, |due| due <= now)
    }

    /// Whether any state exists that is worth pushing to the remote store
    pub fn has_state(&self) -> bool {
        self.is_learned
            || self.is_reserved
            || self.next_review_at.is_some()
            || self.note.is_some()
            || self.custom_spelling.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Serendipity "), "serendipity");
        assert_eq!(Word::new("ABATE").key, "abate");
    }

    #[test]
    fn test_learned_and_reserved_are_exclusive_locally() {
        let mut p = Progress::new("user-1", "abate");
        p.mark_reserved();
        assert!(p.is_reserved);
        assert!(p.reserved_at.is_some());

        p.mark_learned();
        assert!(p.is_learned);
        assert!(!p.is_reserved);
        assert!(p.reserved_at.is_none());

        p.clear_flags();
        assert!(!p.is_learned && !p.is_reserved);
    }

    #[test]
    fn test_progress_deserializes_with_defaults() {
        let json = r#"{"userId":"u","wordKey":"abate","updatedAt":"2026-01-01T00:00:00Z"}"#;
        let p: Progress = serde_json::from_str(json).unwrap();
        assert_eq!(p.ease_factor, DEFAULT_EASE_FACTOR);
        assert!(!p.has_state());
    }
}
