use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::config::{SyncState, SyncStatus};
use crate::queue::QueueStatus;

/// Persistent status line combining queue and sync state:
/// syncing, last synced at, pending and failed counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusIndicator {
    pub syncing: bool,
    pub offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub pending: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusIndicator {
    pub fn from_parts(queue: &QueueStatus, sync: &SyncStatus, online: bool) -> Self {
        Self {
            syncing: sync.status == SyncState::Syncing || queue.is_processing,
            offline: !online,
            last_synced_at: sync.last_sync,
            pending: queue.pending_count,
            failed: queue.failed_count,
            error: match sync.status {
                SyncState::Error => sync.error.clone(),
                _ => None,
            },
        }
    }

    /// Whether the user has something to act on (failed operations or a sync error)
    pub fn needs_attention(&self) -> bool {
        self.failed > 0 || self.error.is_some()
    }
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.syncing {
            write!(f, "Syncing")?;
        } else if self.offline {
            write!(f, "Offline")?;
        } else {
            match self.last_synced_at {
                Some(at) => write!(f, "Last synced {}", at.format("%Y-%m-%d %H:%M"))?,
                None => write!(f, "Never synced")?,
            }
        }
        if self.pending > 0 {
            write!(f, ", {} pending", self.pending)?;
        }
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}
