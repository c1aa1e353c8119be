use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::MergeStats;

/// Settings for the sync coordinator
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Owner of the progress rows pulled and pushed
    pub user_id: String,
    /// Rows per list call
    pub page_size: usize,
    /// Keys per resolve / batch upsert call
    pub chunk_size: usize,
    /// Timeout applied to every remote call
    pub request_timeout: Duration,
}

impl SyncConfig {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            page_size: 500,
            chunk_size: 100,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Current sync state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Nothing has run yet
    #[default]
    Idle,
    /// Currently syncing
    Syncing,
    /// Last sync succeeded
    Success,
    /// Last sync failed
    Error,
    /// Device is offline
    Offline,
}

/// Sync status published to observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Current sync state
    pub status: SyncState,
    /// Last successful sync timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Error message if status is Error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Current operation description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_operation: Option<String>,
    /// One-line summary of the last run, suitable for a toast
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

/// Which sync entry point produced a result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Full,
    Progress,
    MissingStories,
    PushLocal,
    ForceRefresh,
}

impl SyncKind {
    pub fn label(&self) -> &'static str {
        match self {
            SyncKind::Full => "Full sync",
            SyncKind::Progress => "Progress sync",
            SyncKind::MissingStories => "Story refresh",
            SyncKind::PushLocal => "Push to cloud",
            SyncKind::ForceRefresh => "Force refresh",
        }
    }
}

/// Result of a completed sync run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub kind: SyncKind,
    /// Merge counts for pulled words
    pub words: MergeStats,
    /// Merge counts for pulled progress rows
    pub progress: MergeStats,
    /// Stories patched into local words
    pub stories_patched: usize,
    /// Progress rows pushed to the remote store
    pub progress_pushed: usize,
    /// Local rows skipped because their word has no remote counterpart
    pub skipped: usize,
    /// Mirrored words deleted because the remote store no longer lists them
    #[serde(default)]
    pub pruned: usize,
    /// The run stopped early because the manager was paused
    #[serde(default)]
    pub paused: bool,
    /// Duration of sync in milliseconds
    pub duration_ms: u64,
}

impl SyncResult {
    pub fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            words: MergeStats::default(),
            progress: MergeStats::default(),
            stories_patched: 0,
            progress_pushed: 0,
            skipped: 0,
            pruned: 0,
            paused: false,
            duration_ms: 0,
        }
    }

    pub fn summary(&self) -> String {
        let summary = self.counts();
        if self.paused {
            format!("{} (paused)", summary)
        } else {
            summary
        }
    }

    fn counts(&self) -> String {
        match self.kind {
            SyncKind::Full => format!(
                "{}: {} words, {} progress rows",
                self.kind.label(),
                self.words.applied(),
                self.progress.applied()
            ),
            SyncKind::ForceRefresh => format!(
                "{}: {} words, {} progress rows, {} pruned",
                self.kind.label(),
                self.words.applied(),
                self.progress.applied(),
                self.pruned
            ),
            SyncKind::Progress => format!(
                "{}: {} rows ({} updated, {} kept local)",
                self.kind.label(),
                self.progress.applied(),
                self.progress.inserted + self.progress.updated,
                self.progress.kept_local
            ),
            SyncKind::MissingStories => {
                format!("{}: {} stories added", self.kind.label(), self.stories_patched)
            }
            SyncKind::PushLocal => format!(
                "{}: {} rows pushed, {} skipped",
                self.kind.label(),
                self.progress_pushed,
                self.skipped
            ),
        }
    }
}

/// What a sync call did
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncResult),
    /// Another sync held the lock; nothing ran
    Skipped,
}

impl SyncOutcome {
    pub fn result(&self) -> Option<&SyncResult> {
        match self {
            SyncOutcome::Completed(result) => Some(result),
            SyncOutcome::Skipped => None,
        }
    }
}
