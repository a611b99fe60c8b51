use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration structure for the datastore clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Message broker configuration
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Key/document cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Document database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which broker implementation backs the message queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingBackend {
    /// In-process broker, useful for tests and local runs
    #[default]
    Memory,
    /// Kafka cluster (requires the `kafka` feature)
    Kafka,
}

/// Message broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessagingConfig {
    #[serde(default)]
    pub backend: MessagingBackend,

    /// Seed broker addresses (`host:port`)
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,

    /// Broker protocol version the client negotiates, e.g. `2.0.0`
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Client identifier reported to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Partitions created for topics the in-memory broker has not seen yet
    #[serde(default = "default_partitions")]
    pub default_partitions: u32,

    /// Pause before rejoining a consumer group after a rebalance-class error
    #[serde(default = "default_rejoin_backoff_ms")]
    pub rejoin_backoff_ms: u64,
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_protocol_version() -> String {
    ProtocolVersion::default().to_string()
}

fn default_client_id() -> String {
    "datastore".to_string()
}

const fn default_partitions() -> u32 {
    1
}

const fn default_rejoin_backoff_ms() -> u64 {
    250
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::default(),
            brokers: default_brokers(),
            protocol_version: default_protocol_version(),
            client_id: default_client_id(),
            default_partitions: default_partitions(),
            rejoin_backoff_ms: default_rejoin_backoff_ms(),
        }
    }
}

/// Which implementation backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    /// Redis with the RedisJSON module (requires the `redis` feature)
    Redis,
}

/// Cache configuration. Connection fields only apply to the redis backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Server host
    #[serde(default)]
    pub addr: String,

    /// Server port
    #[serde(default)]
    pub port: String,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: String,

    /// Logical database index; 0 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<i64>,

    /// PEM file paths enabling TLS; all three or none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,
}

/// Which implementation backs the document store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Memory,
    /// MongoDB (requires the `mongodb` feature)
    Mongodb,
}

/// Document database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,

    /// Connection URI; `<username>` and `<password>` placeholders are substituted
    #[serde(default)]
    pub uri: String,

    /// Database name
    #[serde(default)]
    pub db_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,
}

/// Logging output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Rolling policy for file output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for log files (stdout only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_console: bool,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_console: true,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Broker protocol version, written `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ProtocolVersion {
    pub const V2_0_0: Self = Self::new(2, 0, 0);

    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V2_0_0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(format!("invalid protocol version: {s}"));
        }
        let mut numbers = [0u16; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("invalid protocol version: {s}"))?;
        }
        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}
