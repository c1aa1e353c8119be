//! Field-preserving merge of remote rows into local records.
//!
//! Remote wins for every field it provides a value for; local wins for fields
//! the remote row leaves out. Progress rows additionally use row-level
//! last-writer-wins on `updated_at`: a remote row older than the local edit is
//! ignored, since the local edit is still on its way to the remote store.

use chrono::{DateTime, Utc};

use crate::remote::{RemoteProgress, RemoteWord};
use crate::vocab::{normalize_key, Progress, Word};

/// What a merge did to the local record
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome<T> {
    /// No local record existed
    Inserted(T),
    /// Local record changed
    Updated(T),
    /// Remote brought nothing new
    Unchanged,
    /// Local record is newer than the remote row
    KeptLocal,
}

impl<T> MergeOutcome<T> {
    /// The record to write back, if any
    pub fn into_record(self) -> Option<T> {
        match self {
            MergeOutcome::Inserted(r) | MergeOutcome::Updated(r) => Some(r),
            MergeOutcome::Unchanged | MergeOutcome::KeptLocal => None,
        }
    }
}

fn take<T: Clone>(target: &mut T, remote: &Option<T>) {
    if let Some(value) = remote {
        *target = value.clone();
    }
}

fn take_opt<T: Clone>(target: &mut Option<T>, remote: &Option<T>) {
    if remote.is_some() {
        *target = remote.clone();
    }
}

pub fn merge_word(local: Option<&Word>, remote: &RemoteWord, now: DateTime<Utc>) -> MergeOutcome<Word> {
    let mut merged = local.cloned().unwrap_or_else(|| Word::new(&remote.word));

    match merged.remote_id {
        Some(existing) if existing != remote.id => {
            log::warn!(
                "Word '{}' already bound to remote id {}, ignoring id {}",
                merged.key,
                existing,
                remote.id
            );
        }
        _ => merged.remote_id = Some(remote.id),
    }

    take_opt(&mut merged.details.part_of_speech, &remote.part_of_speech);
    take(&mut merged.details.meanings, &remote.meanings);
    take(&mut merged.details.examples, &remote.examples);
    take(&mut merged.details.synonyms, &remote.synonyms);
    take(&mut merged.details.antonyms, &remote.antonyms);
    take_opt(&mut merged.details.inflections, &remote.inflections);
    take_opt(&mut merged.story, &remote.story);
    take_opt(&mut merged.frequency_rank, &remote.frequency_rank);
    take_opt(&mut merged.list_rank, &remote.list_rank);
    take_opt(&mut merged.list_id, &remote.list_id);

    if let Some(list_id) = &remote.list_id {
        if !merged.in_list(list_id) {
            merged.lists.push(list_id.clone());
        }
    }

    match local {
        None => {
            merged.synced_at = Some(now);
            MergeOutcome::Inserted(merged)
        }
        Some(existing) if *existing == merged => MergeOutcome::Unchanged,
        Some(_) => {
            merged.synced_at = Some(now);
            MergeOutcome::Updated(merged)
        }
    }
}

pub fn merge_progress(
    local: Option<&Progress>,
    remote: &RemoteProgress,
    now: DateTime<Utc>,
) -> MergeOutcome<Progress> {
    if let (Some(existing), Some(remote_updated)) = (local, remote.updated_at) {
        if existing.updated_at > remote_updated {
            return MergeOutcome::KeptLocal;
        }
    }

    let mut merged = local
        .cloned()
        .unwrap_or_else(|| Progress::new(&remote.user_id, &normalize_key(&remote.word)));

    take(&mut merged.is_learned, &remote.is_learned);
    take(&mut merged.is_reserved, &remote.is_reserved);
    take(&mut merged.next_review_at, &remote.next_review_at);
    take(&mut merged.interval_days, &remote.interval);
    take(&mut merged.ease_factor, &remote.ease_factor);
    take(&mut merged.note, &remote.note);
    take(&mut merged.custom_spelling, &remote.custom_spelling);
    take(&mut merged.learned_at, &remote.learned_at);
    take(&mut merged.reserved_at, &remote.reserved_at);
    if let Some(remote_updated) = remote.updated_at {
        merged.updated_at = remote_updated;
    }

    match local {
        None => {
            if remote.updated_at.is_none() {
                merged.updated_at = now;
            }
            merged.synced_at = Some(now);
            MergeOutcome::Inserted(merged)
        }
        Some(existing) if *existing == merged => MergeOutcome::Unchanged,
        Some(_) => {
            merged.synced_at = Some(now);
            MergeOutcome::Updated(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_reserved_survives_remote_without_field() {
        let now = Utc::now();
        let mut local = Progress::new("u", "abate");
        local.mark_reserved();
        local.updated_at = now - Duration::hours(1);

        let mut remote = RemoteProgress::bare("u", 42, "abate");
        remote.note = Some(Some("from another device".to_string()));

        let merged = merge_progress(Some(&local), &remote, now).into_record().unwrap();
        assert!(merged.is_reserved);
        assert_eq!(merged.note.as_deref(), Some("from another device"));
    }

    #[test]
    fn test_remote_value_wins_when_provided() {
        let now = Utc::now();
        let mut local = Progress::new("u", "abate");
        local.note = Some("local".to_string());
        local.updated_at = now - Duration::hours(2);

        let mut remote = RemoteProgress::bare("u", 42, "abate");
        remote.is_learned = Some(true);
        remote.note = Some(Some("remote".to_string()));
        remote.updated_at = Some(now - Duration::hours(1));

        let merged = merge_progress(Some(&local), &remote, now).into_record().unwrap();
        assert!(merged.is_learned);
        assert_eq!(merged.note.as_deref(), Some("remote"));
        assert_eq!(merged.updated_at, now - Duration::hours(1));
    }

    #[test]
    fn test_remote_null_clears_local_value() {
        let now = Utc::now();
        let mut local = Progress::new("u", "abate");
        local.note = Some("stale".to_string());
        local.custom_spelling = Some("abaite".to_string());
        local.next_review_at = Some(now);
        local.updated_at = now - Duration::hours(1);

        let mut remote = RemoteProgress::bare("u", 42, "abate");
        remote.note = Some(None);
        remote.next_review_at = Some(None);
        remote.updated_at = Some(now);

        let merged = merge_progress(Some(&local), &remote, now).into_record().unwrap();
        assert_eq!(merged.note, None);
        assert_eq!(merged.next_review_at, None);
        assert_eq!(merged.custom_spelling.as_deref(), Some("abaite"));
    }

    #[test]
    fn test_newer_local_edit_is_kept() {
        let now = Utc::now();
        let mut local = Progress::new("u", "abate");
        local.mark_learned();

        let mut remote = RemoteProgress::bare("u", 42, "abate");
        remote.is_learned = Some(false);
        remote.updated_at = Some(local.updated_at - Duration::minutes(5));

        assert_eq!(merge_progress(Some(&local), &remote, now), MergeOutcome::KeptLocal);
    }

    #[test]
    fn test_word_merge_is_idempotent() {
        let now = Utc::now();
        let mut remote = RemoteWord::bare(7, "Abate");
        remote.meanings = Some(vec!["to lessen".to_string()]);

        let first = merge_word(None, &remote, now).into_record().unwrap();
        assert_eq!(first.key, "abate");
        assert_eq!(first.remote_id, Some(7));

        let later = now + Duration::minutes(1);
        assert_eq!(merge_word(Some(&first), &remote, later), MergeOutcome::Unchanged);
    }

    #[test]
    fn test_word_remote_id_never_changes() {
        let now = Utc::now();
        let mut local = Word::new("abate");
        local.remote_id = Some(7);
        local.lists.push("custom".to_string());

        let merged = merge_word(Some(&local), &RemoteWord::bare(9, "abate"), now);
        assert_eq!(merged, MergeOutcome::Unchanged);

        let mut remote = RemoteWord::bare(9, "abate");
        remote.story = Some("a story".to_string());
        let merged = merge_word(Some(&local), &remote, now).into_record().unwrap();
        assert_eq!(merged.remote_id, Some(7));
        assert_eq!(merged.lists, vec!["custom".to_string()]);
    }
}
