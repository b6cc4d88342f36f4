//! Transport configuration
//!
//! Loaded from a TOML file at startup or built in code. Every field has a
//! default, so an empty file (or no file) yields a usable configuration once
//! `url` is set.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::ReconnectPolicy;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "WSRELAY_CONFIG";
/// Config file used when the variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "wsrelay.toml";

/// Reconnecting transport configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Target endpoint (`ws://` or `wss://`), fixed for the transport lifetime
    #[serde(default)]
    pub url: String,

    /// Subprotocols offered in the handshake
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Connect immediately on construction
    #[serde(default = "default_true")]
    pub should_connect: bool,

    /// Automatic reconnection switch
    #[serde(default = "default_true")]
    pub reconnect_enabled: bool,

    /// Reconnect attempts before giving up
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Delay before the first reconnect attempt (ms)
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Cap on any reconnect delay (ms)
    #[serde(default = "default_max_reconnect_interval_ms")]
    pub max_reconnect_interval_ms: u64,

    /// Backoff growth factor
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Handshake deadline (ms)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Heartbeat period while open (ms), 0 disables
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Heartbeat payload, sent as a text frame
    #[serde(default = "default_heartbeat_message")]
    pub heartbeat_message: String,

    /// Bound on frames held while disconnected
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Buffer frames sent while not open instead of dropping them
    #[serde(default = "default_true")]
    pub queue_when_disconnected: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocols: Vec::new(),
            should_connect: true,
            reconnect_enabled: true,
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_interval_ms: default_max_reconnect_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            connection_timeout_ms: default_connection_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_message: default_heartbeat_message(),
            max_queue_size: default_max_queue_size(),
            queue_when_disconnected: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_interval_ms() -> u64 {
    1_000
}

fn default_max_reconnect_interval_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_message() -> String {
    "ping".to_string()
}

fn default_max_queue_size() -> usize {
    100
}

impl TransportConfig {
    /// Defaults targeting `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load from the file named by `WSRELAY_CONFIG` (default `wsrelay.toml`)
    ///
    /// A missing file yields the defaults.
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Load from an explicit path, defaults when the file does not exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Parse TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check the invariants the transport relies on
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("url {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "url scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_interval_ms must be > 0".to_string(),
            ));
        }
        if self.max_reconnect_interval_ms < self.reconnect_interval_ms {
            return Err(ConfigError::Invalid(
                "max_reconnect_interval_ms must be >= reconnect_interval_ms".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(url)
    }

    #[inline]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Heartbeat period, `None` when disabled
    #[inline]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Bound applied to the offline queue (0 when queuing is off)
    #[inline]
    pub fn queue_capacity(&self) -> usize {
        if self.queue_when_disconnected {
            self.max_queue_size
        } else {
            0
        }
    }
}

impl From<&TransportConfig> for ReconnectPolicy {
    fn from(config: &TransportConfig) -> Self {
        let mut policy = ReconnectPolicy::new(
            Duration::from_millis(config.reconnect_interval_ms),
            Duration::from_millis(config.max_reconnect_interval_ms),
            config.backoff_multiplier,
            config.reconnect_attempts,
        );
        policy.enabled = config.reconnect_enabled;
        policy
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error (invalid TOML)
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// Values violate an invariant
    #[error("Invalid config: {0}")]
    Invalid(String),
}
