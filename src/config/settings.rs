use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::extract::ExtractorKind;

pub const DEFAULT_CONFIG_PATH: &str = "conf.toml";
pub const GAME_PORT: u16 = 32800;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config file {0} has no web_hook URL")]
    MissingWebhook(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub web_hook: String,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: Option<String>,
    pub port: u16,
    pub snaplen: i32,
    pub promiscuous: bool,
    pub probe_timeout_ms: u64,
    pub extractor: ExtractorKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub request_timeout_secs: u64,
    pub suppressed_phrases: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            port: GAME_PORT,
            snaplen: 65536,
            promiscuous: true,
            probe_timeout_ms: 2000,
            extractor: ExtractorKind::Text,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            request_timeout_secs: 10,
            suppressed_phrases: ["組隊", "组队", "訓練", "弓箭手村", "都懂"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl CaptureConfig {
    /// BPF expression limiting capture to the game port.
    pub fn filter(&self) -> String {
        format!("tcp port {}", self.port)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&content, &display)
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;

        if config.web_hook.trim().is_empty() {
            return Err(ConfigError::MissingWebhook(origin.to_string()));
        }

        Ok(config)
    }

    /// Host part of the webhook, safe to log without leaking the token path.
    pub fn webhook_host(&self) -> &str {
        let rest = self
            .web_hook
            .split_once("://")
            .map_or(self.web_hook.as_str(), |(_, rest)| rest);
        rest.split('/').next().unwrap_or(rest)
    }
}
