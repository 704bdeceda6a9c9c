//! Configuration loading and management

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use relay_core::TrackerConfig;
use serde::{Deserialize, Serialize};

/// Main configuration for the relay daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on for WebSocket connections
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Take the client address from `X-Forwarded-For` instead of the socket
    #[serde(default)]
    pub trust_proxy: bool,

    /// Frames larger than this are dropped (default: 1 MiB)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// How often idle peers are swept (default: 1 minute)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Engine configuration
    #[serde(default)]
    pub tracker: TrackerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            trust_proxy: false,
            max_message_size: default_max_message_size(),
            sweep_interval_secs: default_sweep_interval(),
            tracker: TrackerConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_sweep_interval() -> u64 {
    60
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults if it
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn sweep_interval(&self) -> Duration {
        // tokio's interval panics on zero
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
