//! Durable FIFO queue of pending remote writes.
//!
//! Every local mutation that has to reach the remote store is recorded here
//! first and persisted in the local store's meta table, so nothing is lost
//! when the app closes while offline. The queue drains strictly in order:
//! a failing head operation is retried with exponential backoff before
//! anything behind it runs.

pub mod backlog;
pub mod payload;
mod worker;

use std::time::Duration;

use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;

pub use backlog::{OperationBacklog, OperationKind, QueuedOperation};
pub use payload::{DeleteProgressPayload, DeleteWordPayload, ProgressPayload};
pub use worker::{backoff_delay, DrainReport, DrainStop, OperationQueue, QueueConfig, QueueStatus};

#[derive(Error, Debug)]
pub enum OperationError {
    /// Payload cannot be turned into a remote call. Never retried.
    #[error("Malformed operation: {0}")]
    Malformed(String),

    /// Word has no remote id yet; a later attempt may find one
    #[error("Word '{0}' has no remote id yet")]
    Unresolved(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl OperationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            OperationError::Malformed(_) => false,
            OperationError::Unresolved(_) => true,
            OperationError::Remote(e) => e.is_retryable(),
            OperationError::Storage(_) => true,
        }
    }
}

/// Default attempts before an operation is parked as failed
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default upper bound of the retry backoff
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);
