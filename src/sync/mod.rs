pub mod config;
pub mod connectivity;
pub mod indicator;
pub mod merge;
pub mod notify;
pub mod scheduler;

mod manager;

pub use config::{SyncConfig, SyncKind, SyncOutcome, SyncResult, SyncState, SyncStatus};
pub use connectivity::Connectivity;
pub use indicator::StatusIndicator;
pub use manager::{SyncError, SyncManager};
pub use merge::MergeOutcome;
pub use notify::{StatusFeed, Subscription};
pub use scheduler::{start_sync_scheduler, SyncScheduler, SyncSchedulerMessage};
