//! Vocabulary domain model for the sync engine
//!
//! This module provides:
//! - Words keyed by their natural key, with optional remote ids
//! - Per-user learning progress (learned / reserved flags, notes, spelling)
//! - SM-2 spaced repetition scheduling
//! - The service UI collaborators call for every user mutation

pub mod algorithm;
pub mod models;
pub mod service;

pub use algorithm::ReviewSchedule;
pub use models::*;
pub use service::VocabService;
