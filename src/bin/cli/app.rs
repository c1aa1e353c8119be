use std::path::Path;

use anyhow::{Context, Result};

use vocab_sync::config::EngineConfig;
use vocab_sync::AppState;

/// Shared application state for CLI commands
pub struct App {
    pub state: AppState,
}

impl App {
    /// Load the config file and open the engine
    pub fn new(config_path: Option<&Path>, user: Option<&str>, online: bool) -> Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => EngineConfig::default_path().context("Failed to locate config directory")?,
        };
        let mut config = EngineConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        if let Some(user) = user {
            config.user_id = Some(user.to_string());
        }

        let state = AppState::open(config).context("Failed to open sync engine")?;
        state.connectivity.set_online(online);

        Ok(Self { state })
    }
}
