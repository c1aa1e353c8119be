//! Bulk enrichment of words with generated stories.
//!
//! A single worker loop walks the words lacking a story in key order, one
//! batch at a time, and records its position in the local store after every
//! batch so an interrupted run picks up where it stopped.

pub mod http;
pub mod worker;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::StoreError;
use crate::vocab::Word;

pub use http::HttpEnricher;
pub use worker::{EnrichmentConfig, EnrichmentReport, EnrichmentWorker};

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Enrichment failed: {0}")]
    Generation(String),

    #[error("Enrichment request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Produces enrichment text for a word
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn story_for(&self, word: &Word) -> Result<String, EnrichError>;
}
