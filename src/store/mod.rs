//! Durable on-device mirror of remote entities
//!
//! This module provides:
//! - Word and progress tables keyed by natural / composite keys
//! - Predicate queries (due reviews, reserved words, missing stories)
//! - Field-preserving bulk merges of remote pages
//! - Auxiliary caches (quiz sessions, audio clips, usage counters)
//! - A key/value meta table that holds the operation queue backlog

pub mod local;
pub mod models;
pub mod schema;

use thiserror::Error;

pub use local::{LocalStore, META_ENRICH_CURSOR, META_LAST_SYNC, META_QUEUE_BACKLOG};
pub use models::{AudioClip, MergeStats, ProgressQuery, QuizSession, StoreStats};

/// Local I/O or quota failure. Fatal for the operation that hit it only.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage failure: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage failure: IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage failure: store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
