//! Wire records exchanged with the remote store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::vocab::{Progress, Word};

/// A row of the remote `words` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteWord {
    pub id: i64,
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meanings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonyms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antonyms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inflections: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
}

impl RemoteWord {
    /// Minimal row carrying only identity, mostly useful for tests
    pub fn bare(id: i64, word: &str) -> Self {
        Self {
            id,
            word: word.to_string(),
            part_of_speech: None,
            meanings: None,
            examples: None,
            synonyms: None,
            antonyms: None,
            inflections: None,
            story: None,
            frequency_rank: None,
            list_rank: None,
            list_id: None,
        }
    }
}

/// Outgoing word upsert. `id` is absent for words created on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordUpsert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub word: String,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
}

impl From<&Word> for WordUpsert {
    fn from(word: &Word) -> Self {
        Self {
            id: word.remote_id,
            word: word.key.clone(),
            part_of_speech: word.details.part_of_speech.clone(),
            meanings: word.details.meanings.clone(),
            examples: word.details.examples.clone(),
            synonyms: word.details.synonyms.clone(),
            antonyms: word.details.antonyms.clone(),
            inflections: word.details.inflections.clone(),
            story: word.story.clone(),
            frequency_rank: word.frequency_rank,
            list_rank: word.list_rank,
            list_id: word.list_id.clone(),
        }
    }
}

/// Keeps an explicit `null` apart from an absent field: absent is `None`,
/// `null` is `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A row of the remote `progress` table joined with its word key.
///
/// `None` means the remote store did not provide the field; the merge keeps
/// the local value in that case. Nullable columns are doubly wrapped so a
/// value cleared remotely (`Some(None)`) clears the local one too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProgress {
    pub user_id: String,
    pub word_id: i64,
    /// Natural key of the joined word
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_learned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reserved: Option<bool>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ease_factor: Option<f32>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub note: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub custom_spelling: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub learned_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteProgress {
    pub fn bare(user_id: &str, word_id: i64, word: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            word_id,
            word: word.to_string(),
            is_learned: None,
            is_reserved: None,
            next_review_at: None,
            interval: None,
            ease_factor: None,
            note: None,
            custom_spelling: None,
            learned_at: None,
            reserved_at: None,
            updated_at: None,
        }
    }
}

/// Outgoing progress upsert; the conflict key is `(user_id, word_id)`.
///
/// Empty nullable columns are sent as `null` so a cleared value clears the
/// remote row as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpsert {
    pub user_id: String,
    pub word_id: i64,
    pub is_learned: bool,
    pub is_reserved: bool,
    #[serde(default)]
    pub next_review_at: Option<DateTime<Utc>>,
    pub interval: i32,
    pub ease_factor: f32,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub custom_spelling: Option<String>,
    #[serde(default)]
    pub learned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reserved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressUpsert {
    /// Build the remote row for a local progress record.
    ///
    /// The remote store never holds both flags set; when a local row has both
    /// (possible after a racing merge) `learned` is kept.
    pub fn from_progress(progress: &Progress, word_id: i64) -> Self {
        let both = progress.is_learned && progress.is_reserved;
        if both {
            log::warn!(
                "Progress {}/{} has both learned and reserved set, pushing as learned",
                progress.user_id,
                progress.word_key
            );
        }
        Self {
            user_id: progress.user_id.clone(),
            word_id,
            is_learned: progress.is_learned,
            is_reserved: progress.is_reserved && !both,
            next_review_at: progress.next_review_at,
            interval: progress.interval_days,
            ease_factor: progress.ease_factor,
            note: progress.note.clone(),
            custom_spelling: progress.custom_spelling.clone(),
            learned_at: progress.learned_at,
            reserved_at: if both { None } else { progress.reserved_at },
            updated_at: progress.updated_at,
        }
    }
}

/// Enrichment text for one word, returned by a targeted story pull
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordStory {
    pub word: String,
    #[serde(default)]
    pub story: Option<String>,
}

/// Identity pair used when resolving natural keys to remote ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordIdentity {
    pub id: i64,
    pub word: String,
}
