//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/inkstream/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/inkstream/` (~/.config/inkstream/)
//! - State/Logs: `$XDG_STATE_HOME/inkstream/` (~/.local/state/inkstream/)

use crate::error::{Error, Result};
use crate::relay::DrainPolicy;
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Active transports, assembled once at startup
    #[serde(default)]
    pub transports: TransportsConfig,

    /// Persistent-connection relay tuning
    #[serde(default)]
    pub relay: RelayConfig,

    /// Host-event observation flags
    #[serde(default)]
    pub observe: ObserveConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which transports the dispatcher is wired with.
///
/// Any subset may be active simultaneously; the console mirror is on by
/// default so a bare config still produces a visible event stream.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportsConfig {
    /// Mirror every record to the diagnostic log
    #[serde(default = "default_console")]
    pub console: bool,

    /// One-shot HTTP collector endpoint (e.g. `https://collector.example.com/webapi/`)
    pub http_url: Option<String>,

    /// Persistent socket collector endpoint (e.g. `wss://collector.example.com/wsapi/in/`)
    pub socket_url: Option<String>,
}

impl Default for TransportsConfig {
    fn default() -> Self {
        Self {
            console: default_console(),
            http_url: None,
            socket_url: None,
        }
    }
}

fn default_console() -> bool {
    true
}

/// Persistent-connection relay tuning
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Delay before a reconnect attempt after a close or error, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Queue drain behavior once the connection is open and ready
    #[serde(default)]
    pub drain: DrainPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            drain: DrainPolicy::default(),
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

/// Host-event observation flags
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ObserveConfig {
    /// Also log unparsed host requests as `raw_http_request` events.
    /// Noisy; useful when the host's save API changes shape.
    #[serde(default)]
    pub raw_debug: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.transports.http_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "transports.http_url must be an http(s) URL, got {:?}",
                    url
                )));
            }
        }
        if let Some(url) = &self.transports.socket_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(Error::Config(format!(
                    "transports.socket_url must be a ws(s) URL, got {:?}",
                    url
                )));
            }
        }
        if self.relay.reconnect_delay_ms == 0 {
            return Err(Error::Config(
                "relay.reconnect_delay_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/inkstream/config.toml` (~/.config/inkstream/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("inkstream").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/inkstream/` (~/.local/state/inkstream/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("inkstream")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/inkstream/inkstream.log` (~/.local/state/inkstream/inkstream.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("inkstream.log")
    }
}
