use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::network::{ConnectionSettings, ExponentialBackoff, FixedDelay};
use crate::storage::ensure_parent_dir;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

pub const WS_URL_ENV: &str = "WHISKER_WS_URL";
pub const API_URL_ENV: &str = "WHISKER_API_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} `{value}`: {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Realtime endpoint; `http(s)` means SockJS, `ws(s)` a plain WebSocket.
    pub ws_url: String,
    pub api_base_url: String,
    pub token_db_path: String,
    pub reconnect_delay_ms: u64,
    /// When set, retries back off exponentially from `reconnect_delay_ms`
    /// up to this cap instead of using a fixed delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_max_delay_ms: Option<u64>,
    pub heartbeat_outgoing_ms: u64,
    pub heartbeat_incoming_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: "http://localhost:8080/ws".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            token_db_path: "data/credentials.db".to_string(),
            reconnect_delay_ms: 5_000,
            reconnect_max_delay_ms: None,
            heartbeat_outgoing_ms: 4_000,
            heartbeat_incoming_ms: 4_000,
        }
    }
}

impl AppConfig {
    /// Environment wins over the file.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(WS_URL_ENV) {
            self.ws_url = value;
        }
        if let Ok(value) = std::env::var(API_URL_ENV) {
            self.api_base_url = value;
        }
    }

    pub fn connection_settings(&self) -> Result<ConnectionSettings, ConfigError> {
        let endpoint = parse_url("ws_url", &self.ws_url)?;
        let settings = ConnectionSettings::new(endpoint).with_heartbeat(
            Duration::from_millis(self.heartbeat_outgoing_ms),
            Duration::from_millis(self.heartbeat_incoming_ms),
        );
        let delay = Duration::from_millis(self.reconnect_delay_ms);
        Ok(match self.reconnect_max_delay_ms {
            Some(max) => settings.with_reconnect_policy(ExponentialBackoff {
                initial: delay,
                max: Duration::from_millis(max).max(delay),
                factor: 2,
            }),
            None => settings.with_reconnect_policy(FixedDelay(delay)),
        })
    }

    pub fn api_base(&self) -> Result<Url, ConfigError> {
        parse_url("api_base_url", &self.api_base_url)
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    ensure_parent_dir(Path::new(path))?;
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
