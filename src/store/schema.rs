//! Versioned schema for the local store.
//!
//! Each entry in [`MIGRATIONS`] moves the database one version forward. The
//! current version lives in `PRAGMA user_version`, so opening an older file
//! applies only the missing steps.

use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    // v1: primary tables and the key/value meta table
    r#"
    CREATE TABLE IF NOT EXISTS words (
        key TEXT PRIMARY KEY,
        remote_id INTEGER UNIQUE,
        details TEXT NOT NULL DEFAULT '{}',
        story TEXT,
        frequency_rank INTEGER,
        list_rank INTEGER,
        list_id TEXT,
        lists TEXT NOT NULL DEFAULT '[]',
        synced_at TEXT
    );

    CREATE TABLE IF NOT EXISTS progress (
        user_id TEXT NOT NULL,
        word_key TEXT NOT NULL,
        is_learned INTEGER NOT NULL DEFAULT 0,
        is_reserved INTEGER NOT NULL DEFAULT 0,
        next_review_at TEXT,
        interval_days INTEGER NOT NULL DEFAULT 0,
        ease_factor REAL NOT NULL DEFAULT 2.5,
        review_count INTEGER NOT NULL DEFAULT 0,
        note TEXT,
        custom_spelling TEXT,
        learned_at TEXT,
        reserved_at TEXT,
        updated_at TEXT NOT NULL,
        synced_at TEXT,
        PRIMARY KEY (user_id, word_key)
    );

    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_progress_review ON progress(is_learned, next_review_at);
    CREATE INDEX IF NOT EXISTS idx_progress_reserved ON progress(is_reserved);
    CREATE INDEX IF NOT EXISTS idx_words_list ON words(list_id, list_rank);
    "#,
    // v2: auxiliary caches
    r#"
    CREATE TABLE IF NOT EXISTS quiz_sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS audio_clips (
        key TEXT PRIMARY KEY,
        mime TEXT NOT NULL,
        data BLOB NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS usage_counters (
        name TEXT PRIMARY KEY,
        count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_quiz_sessions_user ON quiz_sessions(user_id, created_at);
    "#,
];

/// Latest schema version this build knows about
pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}

/// Bring the database up to the latest version. Returns the version reached.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current >= latest_version() {
        return Ok(current);
    }

    let tx = conn.transaction()?;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        log::info!("Local store: applying schema migration v{}", version);
        tx.execute_batch(sql)?;
    }
    tx.pragma_update(None, "user_version", latest_version())?;
    tx.commit()?;

    Ok(latest_version())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_repeatable() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), latest_version());
        assert_eq!(migrate(&mut conn).unwrap(), latest_version());

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('words', 'progress', 'meta', 'quiz_sessions', 'audio_clips', 'usage_counters')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_migrate_from_v1() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.pragma_update(None, "user_version", 1u32).unwrap();

        assert_eq!(migrate(&mut conn).unwrap(), 2);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM usage_counters", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
