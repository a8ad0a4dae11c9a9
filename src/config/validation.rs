use super::models::{BridgeBackend, Config, QueueBackend, TransferMode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("In-memory progress bridge cannot reach separate worker processes; use bridge.backend = \"redis\" with queue.backend = \"redis\"")]
    BridgeUnreachable,

    #[error("Invalid Redis URL scheme in {field}: '{url}', expected 'redis://' or 'rediss://'")]
    InvalidRedisScheme { field: String, url: String },

    #[error("{field} must be positive")]
    NotPositive { field: String },

    #[error("results_url_prefix must be an absolute path below '/': {prefix}")]
    InvalidUrlPrefix { prefix: String },

    #[error("No processor program configured (processor.program)")]
    MissingProcessor,

    #[error("Transfer mode '{mode}' is missing {what}")]
    MissingTransferSetting { mode: &'static str, what: &'static str },
}

/// Validate settings shared by every role
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_topology(config)?;
    validate_limits(config)?;
    validate_server(config)?;
    Ok(())
}

/// Additional checks for processes that execute jobs
pub fn validate_execution(config: &Config) -> Result<(), ValidationError> {
    if config
        .processor
        .program
        .as_deref()
        .is_none_or(|program| program.trim().is_empty())
    {
        return Err(ValidationError::MissingProcessor);
    }

    match config.transfer.mode {
        TransferMode::Api => {
            let api = &config.transfer.api;
            if api.base_url.is_none() {
                return Err(ValidationError::MissingTransferSetting {
                    mode: "api",
                    what: "transfer.api.base_url",
                });
            }
            if api.api_key.is_none() {
                return Err(ValidationError::MissingTransferSetting {
                    mode: "api",
                    what: "PEER_API_KEY",
                });
            }
        }
        TransferMode::Ftps => {
            let ftps = &config.transfer.ftps;
            if ftps.host.is_none() {
                return Err(ValidationError::MissingTransferSetting {
                    mode: "ftps",
                    what: "transfer.ftps.host",
                });
            }
            if ftps.username.is_none() {
                return Err(ValidationError::MissingTransferSetting {
                    mode: "ftps",
                    what: "transfer.ftps.username",
                });
            }
            if ftps.password.is_none() {
                return Err(ValidationError::MissingTransferSetting {
                    mode: "ftps",
                    what: "PEER_FTPS_PASSWORD",
                });
            }
        }
    }

    Ok(())
}

/// Separate worker processes can only report progress over Redis
fn validate_topology(config: &Config) -> Result<(), ValidationError> {
    if config.queue.backend == QueueBackend::Redis && config.bridge.backend == BridgeBackend::Memory
    {
        return Err(ValidationError::BridgeUnreachable);
    }

    if config.queue.backend == QueueBackend::Redis {
        validate_redis_url("queue.redis_url", &config.queue.redis_url)?;
    }
    if config.bridge.backend == BridgeBackend::Redis {
        validate_redis_url("bridge.redis_url", &config.bridge.redis_url)?;
    }

    Ok(())
}

fn validate_redis_url(field: &str, url: &str) -> Result<(), ValidationError> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return Ok(());
    }
    Err(ValidationError::InvalidRedisScheme {
        field: field.to_string(),
        url: url.to_string(),
    })
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    let checks: [(&str, u64); 5] = [
        ("transfer.poll_interval_ms", config.transfer.poll_interval_ms),
        ("transfer.max_attempts", u64::from(config.transfer.max_attempts)),
        ("queue.num_workers", config.queue.num_workers as u64),
        ("worker.max_inflight_jobs", config.worker.max_inflight_jobs as u64),
        ("bridge.capacity", config.bridge.capacity as u64),
    ];

    for (field, value) in checks {
        if value == 0 {
            return Err(ValidationError::NotPositive {
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    let prefix = &config.server.results_url_prefix;
    if !prefix.starts_with('/') || prefix.trim_matches('/').is_empty() {
        return Err(ValidationError::InvalidUrlPrefix {
            prefix: config.server.results_url_prefix.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executable_config() -> Config {
        let mut config = Config::default();
        config.processor.program = Some("/usr/local/bin/model".into());
        config.transfer.api.base_url = Some("http://peer:8001/api/v1".into());
        config.transfer.api.api_key = Some("secret".into());
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_redis_queue_requires_redis_bridge() {
        let mut config = Config::default();
        config.queue.backend = QueueBackend::Redis;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::BridgeUnreachable)
        ));

        config.bridge.backend = BridgeBackend::Redis;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_redis_scheme() {
        let mut config = Config::default();
        config.bridge.backend = BridgeBackend::Redis;
        config.bridge.redis_url = "http://localhost:6379".into();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRedisScheme { .. })
        ));
    }

    #[test]
    fn test_zero_poll_budget_rejected() {
        let mut config = Config::default();
        config.transfer.max_attempts = 0;

        match validate(&config) {
            Err(ValidationError::NotPositive { field }) => {
                assert_eq!(field, "transfer.max_attempts")
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_results_prefix_must_be_nested() {
        let mut config = Config::default();
        config.server.results_url_prefix = "/".into();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidUrlPrefix { .. })
        ));

        config.server.results_url_prefix = "files".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_execution_requires_processor() {
        let mut config = executable_config();
        assert!(validate_execution(&config).is_ok());

        config.processor.program = None;
        assert!(matches!(
            validate_execution(&config),
            Err(ValidationError::MissingProcessor)
        ));
    }

    #[test]
    fn test_execution_requires_transport_credentials() {
        let mut config = executable_config();
        config.transfer.api.api_key = None;
        assert!(matches!(
            validate_execution(&config),
            Err(ValidationError::MissingTransferSetting { what: "PEER_API_KEY", .. })
        ));

        config.transfer.mode = TransferMode::Ftps;
        config.transfer.ftps.host = Some("peer.example".into());
        config.transfer.ftps.username = Some("relay".into());
        assert!(matches!(
            validate_execution(&config),
            Err(ValidationError::MissingTransferSetting { what: "PEER_FTPS_PASSWORD", .. })
        ));

        config.transfer.ftps.password = Some("pw".into());
        assert!(validate_execution(&config).is_ok());
    }
}
