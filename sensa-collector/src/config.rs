//! Configuration for the Sensa services
//!
//! Loaded from a TOML file; every section falls back to defaults so a
//! partial file (or none at all) is valid. The resulting object is passed
//! explicitly to the collector, parsers and saver.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SensaConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub saver: SaverConfig,
    pub logging: LoggingConfig,
}

/// Collector listening socket
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-read timeout on client sockets (0 disables)
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            read_timeout_ms: 30_000,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

/// Message broker
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// URL clients use to reach the broker, e.g. `tcp://127.0.0.1:5672`
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Bind host when running the broker server itself
    pub host: String,
    /// Bind port when running the broker server itself
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:5672".to_string(),
            connect_timeout_ms: 3_000,
            host: "127.0.0.1".to_string(),
            port: 5672,
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Raw snapshot and parser output location
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Persistence consumer
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SaverConfig {
    pub store_dir: PathBuf,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("data/store"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SensaConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use sensa_collector::config::SensaConfig;
    ///
    /// let config = SensaConfig::from_file("sensa.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load `path` if given, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let config = Self::from_file(path)?;
                log::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SensaConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.broker.url, "tcp://127.0.0.1:5672");
        assert_eq!(config.broker.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = SensaConfig::from_toml(
            r#"
[server]
port = 9000
read_timeout_ms = 0

[broker]
url = "tcp://10.0.0.5:5673"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.read_timeout(), None);
        assert_eq!(config.broker.url, "tcp://10.0.0.5:5673");
        assert_eq!(config.broker.connect_timeout_ms, 3_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let err = SensaConfig::from_toml("[server]\nport = \"eight\"").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
