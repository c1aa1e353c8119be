//! Payload snapshots carried by queued operations.
//!
//! Payloads are stored as plain JSON so the backlog survives schema changes;
//! they are decoded and validated only when the operation is processed. A
//! payload missing a required field never reaches the network.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::OperationError;
use crate::remote::{ProgressUpsert, WordUpsert};
use crate::store::LocalStore;
use crate::vocab::{normalize_key, Progress};

pub fn decode<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, OperationError> {
    serde_json::from_value(payload.clone()).map_err(|e| OperationError::Malformed(e.to_string()))
}

/// Resolve a word reference to its remote id: explicit id first, then the
/// remote id the local store knows for the natural key.
fn resolve_word_id(
    store: &LocalStore,
    word_id: Option<i64>,
    word: Option<&str>,
) -> Result<i64, OperationError> {
    if let Some(id) = word_id {
        return Ok(id);
    }
    let Some(word) = word else {
        return Err(OperationError::Malformed("missing word_id and word".to_string()));
    };
    let key = normalize_key(word);
    store
        .get_word(&key)?
        .and_then(|w| w.remote_id)
        .ok_or(OperationError::Unresolved(key))
}

fn require_user(user_id: Option<String>) -> Result<String, OperationError> {
    match user_id {
        Some(user) if !user.is_empty() => Ok(user),
        _ => Err(OperationError::Malformed("missing user_id".to_string())),
    }
}

/// Snapshot of a progress row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(default)]
    pub is_learned: bool,
    #[serde(default)]
    pub is_reserved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ease_factor: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_spelling: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressPayload {
    pub fn from_progress(progress: &Progress, word_id: Option<i64>) -> Self {
        Self {
            user_id: Some(progress.user_id.clone()),
            word_id,
            word: Some(progress.word_key.clone()),
            is_learned: progress.is_learned,
            is_reserved: progress.is_reserved,
            next_review_at: progress.next_review_at,
            interval: progress.interval_days,
            ease_factor: Some(progress.ease_factor),
            note: progress.note.clone(),
            custom_spelling: progress.custom_spelling.clone(),
            learned_at: progress.learned_at,
            reserved_at: progress.reserved_at,
            updated_at: Some(progress.updated_at),
        }
    }

    /// Validate and turn the snapshot into the remote row
    pub fn into_upsert(self, store: &LocalStore) -> Result<ProgressUpsert, OperationError> {
        let user_id = require_user(self.user_id)?;
        let word_id = resolve_word_id(store, self.word_id, self.word.as_deref())?;

        let mut progress = Progress::new(&user_id, self.word.as_deref().unwrap_or_default());
        progress.is_learned = self.is_learned;
        progress.is_reserved = self.is_reserved;
        progress.next_review_at = self.next_review_at;
        progress.interval_days = self.interval;
        if let Some(ease) = self.ease_factor {
            progress.ease_factor = ease;
        }
        progress.note = self.note;
        progress.custom_spelling = self.custom_spelling;
        progress.learned_at = self.learned_at;
        progress.reserved_at = self.reserved_at;
        if let Some(updated_at) = self.updated_at {
            progress.updated_at = updated_at;
        }

        Ok(ProgressUpsert::from_progress(&progress, word_id))
    }
}

/// Reference to a progress row to delete
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteProgressPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
}

impl DeleteProgressPayload {
    pub fn resolve(&self, store: &LocalStore) -> Result<(String, i64), OperationError> {
        let user_id = require_user(self.user_id.clone())?;
        let word_id = resolve_word_id(store, self.word_id, self.word.as_deref())?;
        Ok((user_id, word_id))
    }
}

/// Reference to a word to delete
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteWordPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
}

impl DeleteWordPayload {
    pub fn resolve(&self, store: &LocalStore) -> Result<i64, OperationError> {
        resolve_word_id(store, self.id, self.word.as_deref())
    }
}

/// Decode and validate a word upsert payload
pub fn word_upsert(payload: &serde_json::Value) -> Result<WordUpsert, OperationError> {
    let mut upsert: WordUpsert = decode(payload)?;
    upsert.word = normalize_key(&upsert.word);
    if upsert.word.is_empty() {
        return Err(OperationError::Malformed("empty word".to_string()));
    }
    Ok(upsert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::Word;
    use serde_json::json;

    #[test]
    fn test_progress_without_user_is_malformed() {
        let store = LocalStore::open_in_memory().unwrap();
        let payload: ProgressPayload = decode(&json!({"word_id": 42, "is_learned": true})).unwrap();
        let err = payload.into_upsert(&store).unwrap_err();
        assert!(matches!(err, OperationError::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_progress_resolves_word_key_through_store() {
        let store = LocalStore::open_in_memory().unwrap();
        let payload = ProgressPayload {
            user_id: Some("u".to_string()),
            word: Some("abate".to_string()),
            is_learned: true,
            ..Default::default()
        };

        let err = payload.clone().into_upsert(&store).unwrap_err();
        assert!(matches!(err, OperationError::Unresolved(_)));
        assert!(err.is_retryable());

        let mut word = Word::new("abate");
        word.remote_id = Some(42);
        store.put_word(&word).unwrap();
        let upsert = payload.into_upsert(&store).unwrap();
        assert_eq!(upsert.word_id, 42);
        assert!(upsert.is_learned);
    }

    #[test]
    fn test_word_upsert_requires_word() {
        assert!(matches!(word_upsert(&json!({"id": 3})), Err(OperationError::Malformed(_))));
        assert_eq!(word_upsert(&json!({"word": " Abate "})).unwrap().word, "abate");
    }
}
