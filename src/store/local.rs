//! SQLite-backed local mirror of remote words and progress.
//!
//! All access goes through one connection guarded by a mutex, so writes to
//! the same key can never interleave; multi-row writes run in a single
//! transaction. Every call has committed before it returns.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::models::{AudioClip, MergeStats, ProgressQuery, QuizSession, StoreStats};
use super::schema;
use super::{Result, StoreError};
use crate::remote::{RemoteProgress, RemoteWord};
use crate::sync::merge::{merge_progress, merge_word, MergeOutcome};
use crate::vocab::{normalize_key, Progress, Word};

/// Meta key holding the operation queue backlog
pub const META_QUEUE_BACKLOG: &str = "operation_queue";
/// Meta key holding the time of the last completed sync
pub const META_LAST_SYNC: &str = "last_sync_time";
/// Meta key holding the enrichment worker cursor
pub const META_ENRICH_CURSOR: &str = "enrichment_cursor";

const WORD_COLUMNS: &str =
    "key, remote_id, details, story, frequency_rank, list_rank, list_id, lists, synced_at";

const PROGRESS_COLUMNS: &str = "user_id, word_key, is_learned, is_reserved, next_review_at, \
     interval_days, ease_factor, review_count, note, custom_spelling, learned_at, reserved_at, \
     updated_at, synced_at";

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn word_from_row(row: &Row) -> rusqlite::Result<Word> {
    Ok(Word {
        key: row.get(0)?,
        remote_id: row.get(1)?,
        details: json_column(row, 2)?,
        story: row.get(3)?,
        frequency_rank: row.get(4)?,
        list_rank: row.get(5)?,
        list_id: row.get(6)?,
        lists: json_column(row, 7)?,
        synced_at: row.get(8)?,
    })
}

fn progress_from_row(row: &Row) -> rusqlite::Result<Progress> {
    Ok(Progress {
        user_id: row.get(0)?,
        word_key: row.get(1)?,
        is_learned: row.get(2)?,
        is_reserved: row.get(3)?,
        next_review_at: row.get(4)?,
        interval_days: row.get(5)?,
        ease_factor: row.get(6)?,
        review_count: row.get(7)?,
        note: row.get(8)?,
        custom_spelling: row.get(9)?,
        learned_at: row.get(10)?,
        reserved_at: row.get(11)?,
        updated_at: row.get(12)?,
        synced_at: row.get(13)?,
    })
}

fn read_word(conn: &Connection, key: &str) -> Result<Option<Word>> {
    let word = conn
        .query_row(
            &format!("SELECT {} FROM words WHERE key = ?1", WORD_COLUMNS),
            params![key],
            word_from_row,
        )
        .optional()?;
    Ok(word)
}

/// Upsert a word row. A remote id already stored is never replaced.
fn write_word(conn: &Connection, word: &Word) -> Result<()> {
    conn.execute(
        "INSERT INTO words (key, remote_id, details, story, frequency_rank, list_rank, list_id, lists, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(key) DO UPDATE SET
            remote_id = COALESCE(words.remote_id, excluded.remote_id),
            details = excluded.details,
            story = excluded.story,
            frequency_rank = excluded.frequency_rank,
            list_rank = excluded.list_rank,
            list_id = excluded.list_id,
            lists = excluded.lists,
            synced_at = excluded.synced_at",
        params![
            word.key,
            word.remote_id,
            serde_json::to_string(&word.details)?,
            word.story,
            word.frequency_rank,
            word.list_rank,
            word.list_id,
            serde_json::to_string(&word.lists)?,
            word.synced_at,
        ],
    )?;
    Ok(())
}

fn read_progress(conn: &Connection, user_id: &str, word_key: &str) -> Result<Option<Progress>> {
    let progress = conn
        .query_row(
            &format!(
                "SELECT {} FROM progress WHERE user_id = ?1 AND word_key = ?2",
                PROGRESS_COLUMNS
            ),
            params![user_id, word_key],
            progress_from_row,
        )
        .optional()?;
    Ok(progress)
}

fn write_progress(conn: &Connection, progress: &Progress) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO progress ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            PROGRESS_COLUMNS
        ),
        params![
            progress.user_id,
            progress.word_key,
            progress.is_learned,
            progress.is_reserved,
            progress.next_review_at,
            progress.interval_days,
            progress.ease_factor,
            progress.review_count,
            progress.note,
            progress.custom_spelling,
            progress.learned_at,
            progress.reserved_at,
            progress.updated_at,
            progress.synced_at,
        ],
    )?;
    Ok(())
}

/// Bind a remote id to a local word that does not have one yet
fn bind_remote_id(conn: &Connection, key: &str, remote_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE words SET remote_id = ?2
         WHERE key = ?1 AND remote_id IS NULL
           AND NOT EXISTS (SELECT 1 FROM words WHERE remote_id = ?2)",
        params![key, remote_id],
    )?;
    Ok(changed > 0)
}

/// Unbind `remote_id` from any word other than `key`. A renamed remote word
/// keeps its id, so the old local key must let go of it.
fn release_remote_id(conn: &Connection, key: &str, remote_id: i64) -> Result<()> {
    let released = conn.execute(
        "UPDATE words SET remote_id = NULL WHERE remote_id = ?1 AND key != ?2",
        params![remote_id, key],
    )?;
    if released > 0 {
        log::warn!("Local store: remote id {} moved to '{}'", remote_id, key);
    }
    Ok(())
}

/// Durable, indexed on-device store
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open (or create) the store at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        log::info!("Local store: opened {:?}", path);
        Ok(store)
    }

    /// Non-persistent store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        schema::migrate(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ==================== Words ====================

    pub fn get_word(&self, key: &str) -> Result<Option<Word>> {
        let conn = self.conn()?;
        read_word(&conn, &normalize_key(key))
    }

    pub fn put_word(&self, word: &Word) -> Result<()> {
        let conn = self.conn()?;
        write_word(&conn, word)
    }

    pub fn put_words(&self, words: &[Word]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for word in words {
            write_word(&tx, word)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Administrative removal of a word. Returns whether a row was deleted.
    pub fn delete_word(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM words WHERE key = ?1", params![normalize_key(key)])?;
        Ok(deleted > 0)
    }

    pub fn list_words(&self) -> Result<Vec<Word>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM words ORDER BY key", WORD_COLUMNS))?;
        let words = stmt
            .query_map([], word_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(words)
    }

    pub fn word_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM words", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Words without a story, in key order, strictly after `after`
    pub fn words_missing_story(&self, after: Option<&str>, limit: usize) -> Result<Vec<Word>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM words WHERE story IS NULL AND key > ?1 ORDER BY key LIMIT ?2",
            WORD_COLUMNS
        ))?;
        let words = stmt
            .query_map(params![after.unwrap_or(""), limit as i64], word_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(words)
    }

    /// Set the story of one word. Returns whether the word exists.
    pub fn patch_story(&self, key: &str, story: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE words SET story = ?2 WHERE key = ?1",
            params![normalize_key(key), story],
        )?;
        Ok(changed > 0)
    }

    /// Record the remote id of a word once the remote store assigned it.
    pub fn assign_remote_id(&self, key: &str, remote_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        bind_remote_id(&conn, &normalize_key(key), remote_id)
    }

    /// Known remote ids for the given natural keys
    pub fn remote_ids_for(&self, keys: &[String]) -> Result<HashMap<String, i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT remote_id FROM words WHERE key = ?1 AND remote_id IS NOT NULL")?;
        let mut ids = HashMap::new();
        for key in keys {
            let id: Option<i64> = stmt.query_row(params![key], |row| row.get(0)).optional()?;
            if let Some(id) = id {
                ids.insert(key.clone(), id);
            }
        }
        Ok(ids)
    }

    /// Merge a page of remote words in one transaction.
    pub fn merge_remote_words(&self, rows: &[RemoteWord], now: DateTime<Utc>) -> Result<MergeStats> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut stats = MergeStats::default();

        for remote in rows {
            let local = read_word(&tx, &normalize_key(&remote.word))?;
            match merge_word(local.as_ref(), remote, now) {
                MergeOutcome::Inserted(word) => {
                    release_remote_id(&tx, &word.key, remote.id)?;
                    write_word(&tx, &word)?;
                    stats.inserted += 1;
                }
                MergeOutcome::Updated(word) => {
                    if word.remote_id == Some(remote.id) {
                        release_remote_id(&tx, &word.key, remote.id)?;
                    }
                    write_word(&tx, &word)?;
                    stats.updated += 1;
                }
                MergeOutcome::Unchanged => stats.unchanged += 1,
                MergeOutcome::KeptLocal => stats.kept_local += 1,
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    // ==================== Progress ====================

    pub fn get_progress(&self, user_id: &str, word_key: &str) -> Result<Option<Progress>> {
        let conn = self.conn()?;
        read_progress(&conn, user_id, &normalize_key(word_key))
    }

    pub fn put_progress(&self, progress: &Progress) -> Result<()> {
        let conn = self.conn()?;
        write_progress(&conn, progress)
    }

    pub fn put_progress_many(&self, rows: &[Progress]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for row in rows {
            write_progress(&tx, row)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Read-modify-write of one progress row under the store lock.
    ///
    /// A missing row starts from `Progress::new`. Returns the stored row.
    pub fn update_progress<F>(&self, user_id: &str, word_key: &str, apply: F) -> Result<Progress>
    where
        F: FnOnce(&mut Progress),
    {
        let key = normalize_key(word_key);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut progress = read_progress(&tx, user_id, &key)?.unwrap_or_else(|| Progress::new(user_id, &key));
        apply(&mut progress);
        write_progress(&tx, &progress)?;
        tx.commit()?;
        Ok(progress)
    }

    /// Stamp `synced_at` on rows the remote store acknowledged
    pub fn mark_progress_synced(&self, user_id: &str, word_keys: &[String], at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("UPDATE progress SET synced_at = ?3 WHERE user_id = ?1 AND word_key = ?2")?;
            for key in word_keys {
                stmt.execute(params![user_id, key, at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_progress(&self, user_id: &str, word_key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM progress WHERE user_id = ?1 AND word_key = ?2",
            params![user_id, normalize_key(word_key)],
        )?;
        Ok(deleted > 0)
    }

    pub fn list_progress(&self, user_id: &str) -> Result<Vec<Progress>> {
        self.query_progress(&ProgressQuery::for_user(user_id))
    }

    /// Predicate query over progress rows, ordered by next review then key
    pub fn query_progress(&self, query: &ProgressQuery) -> Result<Vec<Progress>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(user_id) = &query.user_id {
            clauses.push("user_id = ?");
            values.push(Box::new(user_id.clone()));
        }
        if let Some(learned) = query.learned {
            clauses.push("is_learned = ?");
            values.push(Box::new(learned));
        }
        if let Some(reserved) = query.reserved {
            clauses.push("is_reserved = ?");
            values.push(Box::new(reserved));
        }
        if let Some(due_before) = query.due_before {
            clauses.push("next_review_at IS NOT NULL AND next_review_at <= ?");
            values.push(Box::new(due_before));
        }

        let mut sql = format!("SELECT {} FROM progress", PROGRESS_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY next_review_at IS NULL, next_review_at, word_key");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), progress_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Merge a page of remote progress rows in one transaction.
    ///
    /// Words known locally without a remote id get the id from the joined row.
    pub fn merge_remote_progress(
        &self,
        rows: &[RemoteProgress],
        now: DateTime<Utc>,
    ) -> Result<MergeStats> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut stats = MergeStats::default();

        for remote in rows {
            let key = normalize_key(&remote.word);
            bind_remote_id(&tx, &key, remote.word_id)?;

            let local = read_progress(&tx, &remote.user_id, &key)?;
            match merge_progress(local.as_ref(), remote, now) {
                MergeOutcome::Inserted(progress) => {
                    write_progress(&tx, &progress)?;
                    stats.inserted += 1;
                }
                MergeOutcome::Updated(progress) => {
                    write_progress(&tx, &progress)?;
                    stats.updated += 1;
                }
                MergeOutcome::Unchanged => stats.unchanged += 1,
                MergeOutcome::KeptLocal => stats.kept_local += 1,
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    // ==================== Auxiliary tables ====================

    pub fn save_quiz_session(&self, session: &QuizSession) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO quiz_sessions (id, user_id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id.to_string(),
                session.user_id,
                serde_json::to_string(session)?,
                session.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_quiz_session(&self, id: uuid::Uuid) -> Result<Option<QuizSession>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                "SELECT payload FROM quiz_sessions WHERE id = ?1",
                params![id.to_string()],
                |row| json_column(row, 0),
            )
            .optional()?;
        Ok(session)
    }

    /// Most recent quiz sessions for a user, newest first
    pub fn recent_quiz_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<QuizSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM quiz_sessions WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let sessions = stmt
            .query_map(params![user_id, limit as i64], |row| json_column(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Drop cached quiz sessions created before `before`
    pub fn prune_quiz_sessions(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM quiz_sessions WHERE created_at < ?1", params![before])?;
        Ok(deleted)
    }

    pub fn put_audio(&self, clip: &AudioClip) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO audio_clips (key, mime, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![normalize_key(&clip.key), clip.mime, clip.data, clip.created_at],
        )?;
        Ok(())
    }

    pub fn get_audio(&self, key: &str) -> Result<Option<AudioClip>> {
        let conn = self.conn()?;
        let clip = conn
            .query_row(
                "SELECT key, mime, data, created_at FROM audio_clips WHERE key = ?1",
                params![normalize_key(key)],
                |row| {
                    Ok(AudioClip {
                        key: row.get(0)?,
                        mime: row.get(1)?,
                        data: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(clip)
    }

    pub fn delete_audio(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM audio_clips WHERE key = ?1", params![normalize_key(key)])?;
        Ok(deleted > 0)
    }

    /// Add `by` to a named usage counter and return the new total
    pub fn increment_counter(&self, name: &str, by: i64) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO usage_counters (name, count, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET count = count + excluded.count, updated_at = excluded.updated_at",
            params![name, by, Utc::now()],
        )?;
        let count = conn.query_row(
            "SELECT count FROM usage_counters WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn counter(&self, name: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM usage_counters WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    // ==================== Meta ====================

    pub fn get_meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    pub fn set_meta<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    pub fn delete_meta(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
        Ok(())
    }

    // ==================== Maintenance ====================

    /// Remove every row except the persisted operation queue backlog.
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM words;
             DELETE FROM progress;
             DELETE FROM quiz_sessions;
             DELETE FROM audio_clips;
             DELETE FROM usage_counters;",
        )?;
        tx.execute("DELETE FROM meta WHERE key != ?1", params![META_QUEUE_BACKLOG])?;
        tx.commit()?;
        log::info!("Local store: cleared");
        Ok(())
    }

    /// Delete words bound to a remote id outside `listed`. Words never synced,
    /// and words any progress row still refers to, are kept.
    pub fn prune_unlisted_words(&self, listed: &HashSet<i64>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stale: Vec<(String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT key, remote_id FROM words
                 WHERE remote_id IS NOT NULL
                   AND NOT EXISTS (SELECT 1 FROM progress WHERE progress.word_key = words.key)",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut pruned = 0;
        for (key, remote_id) in stale {
            if listed.contains(&remote_id) {
                continue;
            }
            pruned += tx.execute("DELETE FROM words WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        if pruned > 0 {
            log::info!("Local store: pruned {} word(s) gone from the remote store", pruned);
        }
        Ok(pruned)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> rusqlite::Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| c as usize)
        };
        Ok(StoreStats {
            words: count("words")?,
            progress: count("progress")?,
            quiz_sessions: count("quiz_sessions")?,
            audio_clips: count("audio_clips")?,
        })
    }
}
