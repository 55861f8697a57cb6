use crate::global;
use crate::media::ReconnectPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub media: MediaConfig,
    pub reconnect: ReconnectConfig,
    pub presence: PresenceConfig,
    pub feedback: FeedbackConfig,
    pub invite: InviteConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Token issuance endpoint. The in-process loopback issuer is used when unset.
    pub token_endpoint: Option<String>,
    pub token_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Zero disables reconnection.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// WebSocket URL of the presence service (ws:// or wss://).
    pub endpoint: Option<String>,
    /// Chat is marked unavailable if no roster arrives within this window.
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub endpoint: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            token_endpoint: None,
            token_timeout_seconds: 10,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            connect_timeout_seconds: 10,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_seconds: 10,
        }
    }
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3838 }
    }
}

impl MediaConfig {
    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_seconds)
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            max_attempts: self.max_attempts,
        }
    }
}

impl PresenceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl FeedbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Load from `path`, writing a default config there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file not found, creating default at {:?}", path);
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
