//! Engine configuration, read from a TOML file.
//!
//! Every field has a default so a partial (or empty) file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enrich::EnrichmentConfig;
use crate::queue::QueueConfig;
use crate::sync::SyncConfig;

const APP_DIR: &str = "vocab-sync";
const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "vocab.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    DirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the local database. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub remote_url: String,
    pub api_key: String,
    pub user_id: Option<String>,
    pub page_size: usize,
    pub chunk_size: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_backoff_secs: u64,
    pub scheduler_interval_secs: u64,
    pub enrich_batch_size: usize,
    pub enrich_concurrency: usize,
    pub enricher_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            remote_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            user_id: None,
            page_size: 500,
            chunk_size: 100,
            request_timeout_secs: 10,
            max_retries: crate::queue::DEFAULT_MAX_RETRIES,
            max_backoff_secs: crate::queue::DEFAULT_MAX_BACKOFF.as_secs(),
            scheduler_interval_secs: 300,
            enrich_batch_size: 20,
            enrich_concurrency: 4,
            enricher_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Config: {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// `<config dir>/vocab-sync/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::DirNotFound)
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_local_dir()
                .map(|p| p.join(APP_DIR))
                .ok_or(ConfigError::DirNotFound),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(DB_FILE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            request_timeout: self.request_timeout(),
            ..QueueConfig::default()
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            user_id: self.user_id.as_deref().map(str::trim).unwrap_or_default().to_string(),
            page_size: self.page_size.max(1),
            chunk_size: self.chunk_size.max(1),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn enrichment_config(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            batch_size: self.enrich_batch_size.max(1),
            concurrency: self.enrich_concurrency.max(1),
            max_batches: None,
        }
    }
}
