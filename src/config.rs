//! Broker configuration.
//!
//! Loaded once from YAML before any component is built, then passed
//! explicitly. Per-construction [`BrokerOptions`] take precedence.

use crate::broker::health::RECORD_CEILING;
use crate::broker::ring_buffer::DEFAULT_CAPACITY;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Configuration for creating a new broker
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BrokerConfig {
    /// Forward publications to the durable store
    pub persist_enabled: bool,
    /// Append publications to the ring buffer log
    pub mmap_enabled: bool,
    /// Order the dispatch queue by priority
    pub priority_enabled: bool,
    /// Run the status reporter
    pub dashboard_enabled: bool,
    /// Host both endpoints bind to
    pub hostname: String,
    /// Publish (fan-out) endpoint port
    pub port_pub: u16,
    /// Ingestion (request/acknowledge) endpoint port
    pub port_sub: u16,
    /// Reply sent for every ingestion request
    pub ack_rep: String,
    /// Directory of the durable store
    pub db_path: PathBuf,
    /// Directory of the ring buffer log
    pub mmap_path: PathBuf,
    /// File name of the ring buffer log
    pub mmap_file: String,
    /// Data capacity of the ring buffer log in bytes
    pub mmap_capacity: usize,
    /// Client connect timeout in seconds
    pub default_connect_timeout: u64,
    /// Interval between status reports in seconds
    pub status_interval: u64,
    /// Longest ingestion request accepted, in bytes; longer ones drop the connection
    pub max_request_len: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            persist_enabled: true,
            mmap_enabled: true,
            priority_enabled: false,
            dashboard_enabled: true,
            hostname: "127.0.0.1".to_string(),
            port_pub: 5555,
            port_sub: 5556,
            ack_rep: "OK".to_string(),
            db_path: PathBuf::from("./db/"),
            mmap_path: PathBuf::from("./db/mapped/"),
            mmap_file: "broker.ring".to_string(),
            mmap_capacity: DEFAULT_CAPACITY,
            default_connect_timeout: 5,
            status_interval: 30,
            max_request_len: RECORD_CEILING,
        }
    }
}

/// Explicit per-construction overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerOptions {
    pub persist_enabled: Option<bool>,
    pub mmap_enabled: Option<bool>,
    pub priority_enabled: Option<bool>,
    pub dashboard_enabled: Option<bool>,
}

impl BrokerConfig {
    /// Load from a YAML file, falling back to defaults when the file is missing
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply overrides; each one set takes precedence over the loaded value
    pub fn with_options(mut self, options: BrokerOptions) -> Self {
        let overrides = [
            ("persist_enabled", options.persist_enabled, &mut self.persist_enabled),
            ("mmap_enabled", options.mmap_enabled, &mut self.mmap_enabled),
            ("priority_enabled", options.priority_enabled, &mut self.priority_enabled),
            ("dashboard_enabled", options.dashboard_enabled, &mut self.dashboard_enabled),
        ];
        for (name, value, slot) in overrides {
            if let Some(value) = value {
                info!("{} {} (from launch arguments)", name, value);
                *slot = value;
            }
        }
        self
    }

    pub fn publish_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port_pub)
    }

    pub fn ingest_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port_sub)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.default_connect_timeout)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert!(config.persist_enabled);
        assert!(config.mmap_enabled);
        assert!(!config.priority_enabled);
        assert_eq!(config.ack_rep, "OK");
        assert_eq!(config.publish_addr(), "127.0.0.1:5555");
        assert_eq!(config.ingest_addr(), "127.0.0.1:5556");
        assert_eq!(config.mmap_capacity, 65532);
        assert_eq!(config.max_request_len, RECORD_CEILING);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
PERSIST_ENABLED: false
PRIORITY_ENABLED: true
PORT_PUB: 7001
ACK_REP: ACCEPTED
MMAP_PATH: /tmp/ring
MAX_REQUEST_LEN: 4096
"#;
        let config = BrokerConfig::from_yaml(yaml).unwrap();
        assert!(!config.persist_enabled);
        assert!(config.priority_enabled);
        assert_eq!(config.port_pub, 7001);
        assert_eq!(config.port_sub, 5556);
        assert_eq!(config.ack_rep, "ACCEPTED");
        assert_eq!(config.mmap_path, PathBuf::from("/tmp/ring"));
        assert_eq!(config.max_request_len, 4096);
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            BrokerConfig::from_yaml("PORT_PUB: [not, a, port]"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BrokerConfig::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.port_pub, 5555);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "HOSTNAME: 0.0.0.0\nMMAP_ENABLED: false").unwrap();
        let config = BrokerConfig::load(file.path()).unwrap();
        assert_eq!(config.hostname, "0.0.0.0");
        assert!(!config.mmap_enabled);
    }

    #[test]
    fn test_options_take_precedence() {
        let config = BrokerConfig::default().with_options(BrokerOptions {
            persist_enabled: Some(false),
            priority_enabled: Some(true),
            ..Default::default()
        });
        assert!(!config.persist_enabled);
        assert!(config.priority_enabled);
        assert!(config.mmap_enabled);
        assert!(config.dashboard_enabled);
    }
}
