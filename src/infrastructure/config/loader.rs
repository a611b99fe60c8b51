use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{CacheBackend, Config, DatabaseBackend, ProtocolVersion};

/// Project configuration file.
pub const CONFIG_FILE: &str = "datastore.yaml";

/// Optional local overrides, merged over [`CONFIG_FILE`].
pub const LOCAL_CONFIG_FILE: &str = "datastore.local.yaml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "DATASTORE_";

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Broker list cannot be empty")]
    EmptyBrokerList,

    #[error("Broker address cannot be empty")]
    EmptyBrokerAddress,

    #[error("Invalid broker address: {0}. Must be host:port")]
    InvalidBrokerAddress(String),

    #[error("Invalid default_partitions: {0}. Must be at least 1")]
    InvalidPartitions(u32),

    #[error("Invalid protocol version: {0}")]
    InvalidProtocolVersion(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database name cannot be empty when the mongodb backend is selected")]
    EmptyDatabaseName,

    #[error("Database uri cannot be empty when the mongodb backend is selected")]
    EmptyDatabaseUri,

    #[error("Cache addr cannot be empty when the redis backend is selected")]
    EmptyCacheAddress,

    #[error("Invalid cache port: {0}")]
    InvalidCachePort(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `datastore.yaml` in the working directory
    /// 3. `datastore.local.yaml` in the working directory
    /// 4. `DATASTORE_*` environment variables, `__` separating nested keys
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(Path::new(CONFIG_FILE))
            .merge(Yaml::file(LOCAL_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring environment
    /// overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Self::figment(path)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let messaging = &config.messaging;
        if messaging.brokers.is_empty() {
            return Err(ConfigError::EmptyBrokerList);
        }
        for address in &messaging.brokers {
            validate_broker_address(address)?;
        }

        if messaging.default_partitions == 0 {
            return Err(ConfigError::InvalidPartitions(messaging.default_partitions));
        }

        messaging
            .protocol_version
            .parse::<ProtocolVersion>()
            .map_err(|_| ConfigError::InvalidProtocolVersion(messaging.protocol_version.clone()))?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.database.backend == DatabaseBackend::Mongodb {
            if config.database.uri.trim().is_empty() {
                return Err(ConfigError::EmptyDatabaseUri);
            }
            if config.database.db_name.trim().is_empty() {
                return Err(ConfigError::EmptyDatabaseName);
            }
        }

        let cache = &config.cache;
        if cache.backend == CacheBackend::Redis {
            if cache.addr.trim().is_empty() {
                return Err(ConfigError::EmptyCacheAddress);
            }
            if cache.port.trim().parse::<u16>().is_err() {
                return Err(ConfigError::InvalidCachePort(cache.port.clone()));
            }
        }

        Ok(())
    }
}

fn validate_broker_address(address: &str) -> Result<(), ConfigError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ConfigError::EmptyBrokerAddress);
    }
    let valid = address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !valid {
        return Err(ConfigError::InvalidBrokerAddress(address.to_string()));
    }
    Ok(())
}
