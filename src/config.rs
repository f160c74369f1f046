//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::plan::{default_tick_interval, AuthorizedSigners};
use crate::record::validate::is_pubkey;
use crate::relay::validate_relay_url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub relays: RelayConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Who may issue directives and how long a plan lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Hex pubkeys of authorized signers, in display order
    #[serde(default = "default_authorized_pubkeys")]
    pub authorized_pubkeys: Vec<String>,

    /// Seconds without a matching directive before the plan decays
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// Recompute period (defaults to a tenth of the timeout)
    #[serde(default)]
    pub tick_interval_secs: Option<u64>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            authorized_pubkeys: default_authorized_pubkeys(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            tick_interval_secs: None,
        }
    }
}

impl SignalConfig {
    pub fn authorized(&self) -> AuthorizedSigners {
        AuthorizedSigners::new(self.authorized_pubkeys.iter().cloned())
    }

    pub fn tick_interval(&self) -> Duration {
        match self.tick_interval_secs {
            Some(secs) => Duration::from_secs(secs.max(1)),
            None => default_tick_interval(self.inactivity_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relays for general kinds (profiles)
    #[serde(default = "default_public_relays")]
    pub public_relays: Vec<String>,

    /// Relays that carry directives and acknowledgements
    #[serde(default = "default_special_relays")]
    pub special_relays: Vec<String>,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// 0 = retry forever
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// How long to wait for stored events before leaving bootstrapping
    #[serde(default = "default_bootstrap_grace")]
    pub bootstrap_grace_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            public_relays: default_public_relays(),
            special_relays: default_special_relays(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_attempts: 0,
            ping_interval_secs: default_ping_interval(),
            query_timeout_secs: default_query_timeout(),
            bootstrap_grace_ms: default_bootstrap_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Stored events requested per subscription
    #[serde(default = "default_feed_limit")]
    pub limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            limit: default_feed_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
        }
    }
}

// Defaults
fn default_authorized_pubkeys() -> Vec<String> {
    [
        "706c6320ad12b03a3ddc978f6fbd6d5b3eb1484c56f2f20b4df04545015e6c86",
        "80ebe917ae63946ebf7577bcf68d43ff89f102a6596d41e7f1bd6f43c311dc89",
        "ee2c1d50281983a1abd271d41d1f0ca7943390c8ec261e826d56c5930de54623",
        "db9cbf7cc2a608d8d91fa1b63e1f2aea55d95b861ca1cf93facb5c1fba51d662",
        "ee7f03817f965fb3828239420e59580023eb184e142fd4cf79c619feae3200c3",
        "f718a11ee3d95e9e0a62578dd31ba82789035025326e0ccc0f2263fe641391c6",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_inactivity_timeout() -> u64 { 3600 }
fn default_public_relays() -> Vec<String> {
    vec![
        "wss://relay.damus.io".to_string(),
        "wss://relay.primal.net".to_string(),
    ]
}
fn default_special_relays() -> Vec<String> {
    vec!["ws://localhost:3334".to_string()]
}
fn default_reconnect_delay() -> u64 { 5 }
fn default_ping_interval() -> u64 { 30 }
fn default_query_timeout() -> u64 { 10 }
fn default_bootstrap_grace() -> u64 { 1200 }
fn default_feed_limit() -> usize { 50 }
fn default_http_port() -> u16 { 8080 }

impl Config {
    /// Parse and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signal.authorized_pubkeys.is_empty() {
            return Err(ConfigError::Invalid(
                "signal.authorized_pubkeys must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self.signal.authorized_pubkeys.iter().find(|p| !is_pubkey(p)) {
            return Err(ConfigError::Invalid(format!(
                "authorized pubkey '{}' is not 64 lowercase hex characters",
                bad
            )));
        }
        if self.signal.inactivity_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "signal.inactivity_timeout_secs must be positive".to_string(),
            ));
        }

        for url in self.relays.public_relays.iter().chain(&self.relays.special_relays) {
            validate_relay_url(url).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.relays.query_timeout_secs == 0 || self.relays.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "relay timeouts must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
