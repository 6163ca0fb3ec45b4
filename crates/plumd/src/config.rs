//! Configuration file parsing and structures.
//!
//! plumd reads a single TOML file. Only the `[cloud]` credentials are
//! required; discovery, event streaming and logging fall back to the values
//! Plum devices use out of the box.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{LevelFilter, Targets};

/// Top-level configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub cloud: CloudConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"plumd::discovery" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the subscriber filter for this logging section.
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

fn default_base_url() -> String {
    "https://production.plum.technology/v2/".to_string()
}

fn default_await_timeout_secs() -> u64 {
    30
}

fn default_sync_timeout_secs() -> u64 {
    120
}

/// Plum cloud directory credentials and limits
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    pub username: String,
    pub password: String,

    /// Root of the directory API; endpoint names are appended to it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// How long `await_device`/`await_load` wait before giving up
    #[serde(default = "default_await_timeout_secs")]
    pub await_timeout_secs: u64,

    /// Overall deadline for a full directory walk
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

impl CloudConfig {
    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Local network discovery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Destination of the probe datagram
    pub broadcast_address: Ipv4Addr,

    /// Port lightpads listen on for probes
    pub probe_port: u16,

    /// Port the heartbeat listener binds
    pub heartbeat_port: u16,

    /// Number of probe-then-listen cycles
    pub probe_cycles: u32,

    /// Listen window of each probe cycle
    pub listen_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_address: Ipv4Addr::BROADCAST,
            probe_port: 43770,
            heartbeat_port: 43770,
            probe_cycles: 2,
            listen_timeout_secs: 15,
        }
    }
}

impl DiscoveryConfig {
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }
}

/// Per-device event stream settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 2708,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [cloud]
            username = "me@example.com"
            password = "hunter2"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.cloud.base_url, "https://production.plum.technology/v2/");
        assert_eq!(config.cloud.await_timeout(), Duration::from_secs(30));
        assert_eq!(config.discovery.broadcast_address, Ipv4Addr::BROADCAST);
        assert_eq!(config.discovery.probe_port, 43770);
        assert_eq!(config.discovery.probe_cycles, 2);
        assert!(config.events.enabled);
        assert_eq!(config.events.port, 2708);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [logging]
            level = "debug"

            [logging.overrides]
            "plumd::discovery" = "trace"

            [cloud]
            username = "me@example.com"
            password = "hunter2"
            base_url = "http://localhost:8080/v2/"
            await_timeout_secs = 5
            sync_timeout_secs = 10

            [discovery]
            broadcast_address = "192.168.1.255"
            probe_port = 5000
            heartbeat_port = 5001
            probe_cycles = 3
            listen_timeout_secs = 2

            [events]
            enabled = false
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides.get("plumd::discovery"),
            Some(&LogLevel::Trace)
        );
        assert_eq!(config.cloud.sync_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.discovery.broadcast_address,
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(config.discovery.heartbeat_port, 5001);
        assert_eq!(config.discovery.listen_timeout(), Duration::from_secs(2));
        assert!(!config.events.enabled);
        assert_eq!(config.events.port, 2708);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let toml = r#"
            [cloud]
            username = "me@example.com"
        "#;

        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plumd.toml");
        std::fs::write(
            &path,
            "[cloud]\nusername = \"a\"\npassword = \"b\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.cloud.username, "a");

        let missing = Config::from_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(..))));
    }
}
