use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of remote writes that can be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    UpsertProgress,
    DeleteProgress,
    UpsertWord,
    DeleteWord,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpsertProgress => write!(f, "upsert_progress"),
            Self::DeleteProgress => write!(f, "delete_progress"),
            Self::UpsertWord => write!(f, "upsert_word"),
            Self::DeleteWord => write!(f, "delete_word"),
        }
    }
}

/// A single queued remote write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique ID for this queue item
    pub id: Uuid,
    pub kind: OperationKind,
    /// Snapshot of the record at enqueue time
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Number of failed attempts
    pub retry_count: u32,
    /// Attempts allowed before the operation is considered failed
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedOperation {
    pub fn is_failed(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Ordered backlog of queued operations, pending and failed alike.
///
/// Failed operations stay in place (so a retry keeps their original order)
/// and are told apart by their retry counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationBacklog {
    pub items: Vec<QueuedOperation>,
}

impl OperationBacklog {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append an operation and return its id
    pub fn enqueue(&mut self, kind: OperationKind, payload: serde_json::Value, max_retries: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.items.push(QueuedOperation {
            id,
            kind,
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries,
            last_error: None,
            last_attempt_at: None,
        });
        id
    }

    /// First operation that has not exhausted its retries
    pub fn head(&self) -> Option<&QueuedOperation> {
        self.items.iter().find(|item| !item.is_failed())
    }

    pub fn get(&self, id: Uuid) -> Option<&QueuedOperation> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Mark an item as completed (remove it)
    pub fn complete(&mut self, id: Uuid) {
        self.items.retain(|item| item.id != id);
    }

    /// Record a failed attempt. A terminal failure exhausts the retries at once.
    ///
    /// Returns the updated item, if it exists.
    pub fn record_failure(&mut self, id: Uuid, error: String, terminal: bool) -> Option<&QueuedOperation> {
        let item = self.items.iter_mut().find(|i| i.id == id)?;
        item.retry_count = if terminal {
            item.max_retries.max(item.retry_count + 1)
        } else {
            item.retry_count + 1
        };
        item.last_error = Some(error);
        item.last_attempt_at = Some(Utc::now());
        Some(item)
    }

    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_failed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_failed()).count()
    }

    pub fn pending(&self) -> Vec<QueuedOperation> {
        self.items.iter().filter(|item| !item.is_failed()).cloned().collect()
    }

    pub fn failed(&self) -> Vec<QueuedOperation> {
        self.items.iter().filter(|item| item.is_failed()).cloned().collect()
    }

    /// Reset retry counters of failed items. Returns how many were reset.
    pub fn retry_failed(&mut self) -> usize {
        let mut reset = 0;
        for item in self.items.iter_mut().filter(|item| item.is_failed()) {
            item.retry_count = 0;
            reset += 1;
        }
        reset
    }

    /// Drop failed items for good. Returns how many were removed.
    pub fn clear_failed(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_failed());
        before - self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_head_skips_failed_items() {
        let mut backlog = OperationBacklog::new();
        let a = backlog.enqueue(OperationKind::UpsertWord, json!({"word": "a"}), 5);
        let b = backlog.enqueue(OperationKind::UpsertWord, json!({"word": "b"}), 5);

        assert_eq!(backlog.head().unwrap().id, a);
        backlog.record_failure(a, "rejected".to_string(), true);
        assert_eq!(backlog.head().unwrap().id, b);
        assert_eq!(backlog.pending_count(), 1);
        assert_eq!(backlog.failed_count(), 1);
    }

    #[test]
    fn test_transient_failures_count_up_to_ceiling() {
        let mut backlog = OperationBacklog::new();
        let id = backlog.enqueue(OperationKind::DeleteWord, json!({"id": 1}), 5);

        for attempt in 1..=4 {
            let item = backlog.record_failure(id, "timeout".to_string(), false).unwrap();
            assert_eq!(item.retry_count, attempt);
            assert!(!item.is_failed());
        }
        assert!(backlog.record_failure(id, "timeout".to_string(), false).unwrap().is_failed());
    }

    #[test]
    fn test_clear_failed_keeps_pending() {
        let mut backlog = OperationBacklog::new();
        for i in 0..5 {
            backlog.enqueue(OperationKind::UpsertWord, json!({"word": i.to_string()}), 5);
        }
        let failed: Vec<Uuid> = backlog.items.iter().skip(2).map(|i| i.id).collect();
        for id in failed {
            backlog.record_failure(id, "rejected".to_string(), true);
        }

        assert_eq!(backlog.clear_failed(), 3);
        assert_eq!(backlog.pending_count(), 2);
        assert_eq!(backlog.failed_count(), 0);
    }

    #[test]
    fn test_retry_failed_keeps_order() {
        let mut backlog = OperationBacklog::new();
        let a = backlog.enqueue(OperationKind::UpsertWord, json!({"word": "a"}), 5);
        backlog.enqueue(OperationKind::UpsertWord, json!({"word": "b"}), 5);
        backlog.record_failure(a, "rejected".to_string(), true);

        assert_eq!(backlog.retry_failed(), 1);
        assert_eq!(backlog.head().unwrap().id, a);
        assert_eq!(backlog.get(a).unwrap().retry_count, 0);
    }
}
