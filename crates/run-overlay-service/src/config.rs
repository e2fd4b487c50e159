//! Watch service configuration
//!
//! Loaded from `overlay.json` in a config directory. A missing file yields
//! the defaults; every field is optional in the file.

use std::path::Path;
use std::time::Duration;

use run_overlay::{RenderMode, RenderOptions};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::{defaults, files};
use crate::error::ConfigError;

/// Configuration for a run watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchConfig {
    /// Base URL of the run-tree endpoint; no tree source when unset
    pub tree_base_url: Option<String>,
    /// Interval between tree polls while a run is watched (0 disables polling)
    pub tree_poll_interval_ms: u64,
    /// Timeout for a single tree request
    pub tree_request_timeout_ms: u64,
    /// Capacity of the watcher's command queue
    pub command_queue_capacity: usize,
    /// Fetch the tree as soon as a batch carries a terminal signal
    pub refresh_on_terminal_signal: bool,
    /// Mode the watcher starts in
    pub initial_mode: RenderMode,
    /// Composition options
    pub render: RenderOptions,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tree_base_url: None,
            tree_poll_interval_ms: defaults::TREE_POLL_INTERVAL_MS,
            tree_request_timeout_ms: defaults::TREE_REQUEST_TIMEOUT_MS,
            command_queue_capacity: defaults::COMMAND_QUEUE_CAPACITY,
            refresh_on_terminal_signal: true,
            initial_mode: RenderMode::Execute,
            render: RenderOptions::default(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from `dir`, or the defaults if no file exists
    pub async fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(files::CONFIG);

        if !fs::try_exists(&config_path).await.map_err(ConfigError::Io)? {
            log::debug!("No overlay config at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).await.map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to `dir`
    pub async fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir).await.map_err(ConfigError::Io)?;

        let config_path = dir.join(files::CONFIG);
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(&config_path, contents).await.map_err(ConfigError::Io)?;

        log::info!("Overlay configuration saved to {:?}", config_path);
        Ok(())
    }

    /// Poll interval, or `None` when polling is disabled
    pub fn tree_poll_interval(&self) -> Option<Duration> {
        (self.tree_poll_interval_ms > 0).then(|| Duration::from_millis(self.tree_poll_interval_ms))
    }

    pub fn tree_request_timeout(&self) -> Duration {
        Duration::from_millis(self.tree_request_timeout_ms)
    }

    /// Queue capacity, never zero
    pub fn queue_capacity(&self) -> usize {
        self.command_queue_capacity.max(1)
    }
}
