//! Configuration management for jobrelay
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use jobrelay::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `JOBRELAY__<section>__<key>`:
//! - `JOBRELAY__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `JOBRELAY__QUEUE__BACKEND=redis`
//! - `JOBRELAY__TRANSFER__MODE=ftps`
//!
//! Peer credentials are read only from `PEER_API_KEY` and
//! `PEER_FTPS_PASSWORD`.
//!
//! # Configuration File
//!
//! Loaded from `config/jobrelay.toml` unless `JOBRELAY_CONFIG` points
//! elsewhere.

mod models;
mod sources;
mod validation;

pub use models::{
    ApiSettings, BridgeBackend, BridgeConfig, Config, FtpsSettings, ProcessorConfig,
    QueueBackend, QueueConfig, ServerConfig, TransferConfig, TransferMode, WorkerSettings,
};
pub use validation::ValidationError;

use std::time::Duration;
use thiserror::Error;

use crate::bridge::ReconnectPolicy;
use crate::transfer::PollPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Check what a job-executing process needs on top of [`Config::load`]
    pub fn validate_execution(&self) -> Result<(), ConfigError> {
        validation::validate_execution(self)?;
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.transfer.poll_interval_ms),
            self.transfer.max_attempts,
        )
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.bridge.reconnect_initial_ms),
            Duration::from_millis(self.bridge.reconnect_max_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_rejects_unreachable_bridge() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[queue]
backend = "redis"

[bridge]
backend = "memory"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::BridgeUnreachable)
        ));
    }

    #[test]
    fn test_policies_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[bridge]
reconnect_initial_ms = 100
reconnect_max_ms = 1000

[transfer]
poll_interval_ms = 2000
max_attempts = 30
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        let poll = config.poll_policy();
        assert_eq!(poll.interval, Duration::from_secs(2));
        assert_eq!(poll.max_attempts, 30);

        let reconnect = config.reconnect_policy();
        assert_eq!(reconnect.initial_delay, Duration::from_millis(100));
        assert_eq!(reconnect.max_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "[server\nbind_addr = ").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path),
            Err(ConfigError::LoadError(_))
        ));
    }
}
