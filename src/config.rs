//! # Configuration Management
//!
//! This module handles loading and validating configuration for the kece server.
//! Settings are layered, lowest priority first:
//! 1. Built-in defaults
//! 2. A TOML file (optional)
//! 3. Environment variables prefixed with `KECE_` (e.g. `KECE_AUTH=secret`)
//! 4. Command-line overrides applied by the binary
//!
//! ## Example Configuration File (kece.toml)
//! ```toml
//! host = "0.0.0.0"
//! port = 9000
//! network = "tcp"
//! auth = "secret123"
//! engine = "sled"
//! storage_path = "data"
//! max_inflight_requests = 1024
//! event_queue_capacity = 1024
//! revoke_auth_on_disconnect = true
//! ```

use config::{Config as ConfigLib, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration problems detected after loading.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported network '{0}' (expected tcp, tcp4 or tcp6)")]
    UnsupportedNetwork(String),

    #[error("unknown engine '{0}' (expected rwlock or sled)")]
    UnknownEngine(String),

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Main configuration structure for the kece server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IP address or hostname to bind the listener to
    pub host: String,

    /// Port number for the listener
    pub port: u16,

    /// Transport family: "tcp" (any), "tcp4" or "tcp6"
    pub network: String,

    /// Shared secret clients must present with AUTH.
    /// An empty string disables authentication entirely.
    pub auth: String,

    /// Storage engine type: "rwlock" (in-memory) or "sled" (persistent)
    pub engine: String,

    /// Directory for the sled engine
    pub storage_path: String,

    /// Upper bound on dispatcher tasks running at the same time
    pub max_inflight_requests: usize,

    /// Capacity of each event queue feeding the event loop
    pub event_queue_capacity: usize,

    /// Drop a client's auth marker from storage when it disconnects
    pub revoke_auth_on_disconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            network: "tcp".to_string(),
            auth: String::new(),
            engine: "rwlock".to_string(),
            storage_path: "data".to_string(),
            max_inflight_requests: 1024,
            event_queue_capacity: 1024,
            revoke_auth_on_disconnect: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file layered under `KECE_*` environment
    /// variables. A missing file is not an error; defaults fill the gaps.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::path::Path;
    /// let config = kece::Config::load(Path::new("kece.toml"))?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ConfigLib::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("KECE"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.network.as_str(), "tcp" | "tcp4" | "tcp6") {
            return Err(ConfigError::UnsupportedNetwork(self.network.clone()));
        }
        if !matches!(self.engine.as_str(), "rwlock" | "sled") {
            return Err(ConfigError::UnknownEngine(self.engine.clone()));
        }
        if self.max_inflight_requests == 0 {
            return Err(ConfigError::ZeroLimit("max_inflight_requests"));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::ZeroLimit("event_queue_capacity"));
        }
        Ok(())
    }

    /// The shared secret, or `None` when authentication is disabled.
    pub fn secret(&self) -> Option<&str> {
        if self.auth.is_empty() {
            None
        } else {
            Some(self.auth.as_str())
        }
    }

    /// `host:port` string handed to the resolver.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_load() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file.as_file_mut(),
            r#"
host = "0.0.0.0"
port = 7000
auth = "secret123"
engine = "sled"
max_inflight_requests = 16
            "#
        )
        .unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7000);
        assert_eq!(config.secret(), Some("secret123"));
        assert_eq!(config.engine, "sled");
        assert_eq!(config.max_inflight_requests, 16);
        // Untouched fields keep their defaults
        assert_eq!(config.network, "tcp");
        assert_eq!(config.event_queue_capacity, 1024);
        assert!(!config.revoke_auth_on_disconnect);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.port, Config::default().port);
        assert_eq!(config.bind_address(), format!("{}:{}", config.host, config.port));
    }

    #[test]
    fn test_empty_auth_disables_secret() {
        let config = Config::default();
        assert_eq!(config.secret(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.network = "udp".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsupportedNetwork("udp".to_string()))
        );

        let mut config = Config::default();
        config.engine = "rocks".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownEngine("rocks".to_string()))
        );

        let mut config = Config::default();
        config.max_inflight_requests = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit("max_inflight_requests"))
        );
    }
}
