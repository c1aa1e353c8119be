use std::sync::Arc;

use tokio::task::JoinHandle;

pub mod config;
pub mod enrich;
pub mod queue;
pub mod remote;
pub mod store;
pub mod sync;
pub mod vocab;

#[cfg(test)]
mod testing;

use config::{ConfigError, EngineConfig};
use enrich::{EnrichError, EnrichmentWorker, HttpEnricher};
use queue::OperationQueue;
use remote::{RemoteError, RemoteStore, RestClient};
use store::{LocalStore, StoreError};
use sync::{start_sync_scheduler, Connectivity, StatusIndicator, SyncManager, SyncScheduler};
use vocab::VocabService;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Enrich(#[from] EnrichError),
    #[error("No enricher configured (set enricher_url)")]
    NoEnricher,
}

/// Every component of the engine, wired to one store, one remote and one
/// connectivity handle.
pub struct AppState {
    pub config: EngineConfig,
    pub store: LocalStore,
    pub remote: Arc<dyn RemoteStore>,
    pub connectivity: Connectivity,
    pub queue: OperationQueue,
    pub sync: Arc<SyncManager>,
    pub vocab: VocabService,
}

/// Background tasks started by [`AppState::start`]
pub struct BackgroundTasks {
    pub queue_watcher: JoinHandle<()>,
    pub scheduler: SyncScheduler,
}

impl BackgroundTasks {
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.queue_watcher.abort();
        log::info!("Engine: background tasks stopped");
    }
}

impl AppState {
    /// Open the on-disk store and the REST remote named in `config`.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::from)?;
        }
        let store = LocalStore::open(&db_path)?;
        let remote = RestClient::new(&config.remote_url, &config.api_key, config.request_timeout())?;
        log::info!("Engine: opened {}", db_path.display());
        Self::with_parts(config, store, Arc::new(remote), Connectivity::new(true))
    }

    pub fn with_parts(
        config: EngineConfig,
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
    ) -> Result<Self, EngineError> {
        let queue = OperationQueue::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            config.queue_config(),
        )?;
        let sync_config = config.sync_config();
        let sync = Arc::new(SyncManager::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            sync_config.clone(),
        ));
        let vocab = VocabService::new(store.clone(), queue.clone(), &sync_config.user_id);

        Ok(Self {
            config,
            store,
            remote,
            connectivity,
            queue,
            sync,
            vocab,
        })
    }

    /// Start the reconnect watcher and the periodic scheduler.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> BackgroundTasks {
        let queue_watcher = self.queue.start();
        let scheduler = start_sync_scheduler(
            self.sync.clone(),
            self.queue.clone(),
            self.connectivity.clone(),
            self.config.scheduler_interval(),
        );
        BackgroundTasks {
            queue_watcher,
            scheduler,
        }
    }

    pub fn indicator(&self) -> StatusIndicator {
        StatusIndicator::from_parts(
            &self.queue.status(),
            &self.sync.status(),
            self.connectivity.is_online(),
        )
    }

    /// Enrichment worker backed by the configured HTTP enricher
    pub fn enrichment_worker(&self) -> Result<EnrichmentWorker, EngineError> {
        let url = self.config.enricher_url.as_deref().ok_or(EngineError::NoEnricher)?;
        let key = Some(self.config.api_key.as_str()).filter(|k| !k.is_empty());
        let enricher = HttpEnricher::new(url, key, self.config.request_timeout())?;
        Ok(EnrichmentWorker::new(
            self.store.clone(),
            self.vocab.clone(),
            Arc::new(enricher),
            self.config.enrichment_config(),
        ))
    }
}
