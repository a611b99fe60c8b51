//! Redis backend for the cache.
//!
//! Values are stored as RedisJSON documents (`JSON.SET`/`JSON.GET`/`JSON.DEL`
//! at the root path), so the server needs the RedisJSON module loaded.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionInfo, IntoConnectionInfo, TlsCertificates};
use serde_json::Value;

use crate::domain::errors::{require_non_empty, StoreError, StoreResult};
use crate::domain::models::CacheConfig;
use crate::domain::ports::Cache;

/// Acknowledgement returned by a successful write.
pub const WRITE_ACK: &str = "OK";

/// Database index used when none is configured.
pub const DEFAULT_DB: i64 = 0;

/// Keys requested per `SCAN` round when listing every key.
const SCAN_COUNT: usize = 10;

const ROOT_PATH: &str = ".";

pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    /// Validate the configuration, connect, and `PING` the server.
    pub async fn connect(config: &CacheConfig) -> StoreResult<Self> {
        validate(config)?;

        let info = connection_info(config)?;
        let client = match tls_certificates(config).await? {
            Some(certificates) => Client::build_with_tls(info, certificates),
            None => Client::open(info),
        }
        .map_err(|err| StoreError::Configuration(format!("invalid redis configuration: {err}")))?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|err| StoreError::backend("connect", err))?;
        let cache = Self { connection };
        cache.ping("connect").await?;

        tracing::info!(addr = %config.addr, port = %config.port, "connected to redis cache");
        Ok(cache)
    }

    async fn ping(&self, operation: &'static str) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|err| StoreError::backend(operation, err))?;
        if reply != "PONG" {
            return Err(StoreError::backend(operation, format!("unexpected ping reply {reply}")));
        }
        Ok(())
    }

    async fn scan_all(&self) -> StoreResult<Vec<String>> {
        let mut connection = self.connection.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("*")
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut connection)
                .await
                .map_err(|err| StoreError::backend("get_keys", err))?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

/// Reject missing connection parameters before any I/O.
pub fn validate(config: &CacheConfig) -> StoreResult<()> {
    let required = [
        ("addr", config.addr.as_str()),
        ("port", config.port.as_str()),
        ("username", config.username.as_str()),
        ("password", config.password.as_str()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(StoreError::Configuration(format!(
            "redis cache {field} cannot be empty"
        )));
    }
    if config.port.parse::<u16>().is_err() {
        return Err(StoreError::Configuration(format!(
            "redis cache port {} is not a valid port",
            config.port
        )));
    }
    if config.db.is_some_and(|db| db < 0) {
        return Err(StoreError::Configuration(
            "redis cache db index cannot be negative".to_string(),
        ));
    }

    let tls = [
        ("tls_ca", &config.tls_ca),
        ("tls_cert", &config.tls_cert),
        ("tls_key", &config.tls_key),
    ];
    if let Some((field, _)) = tls
        .iter()
        .find(|(_, path)| path.as_deref().is_some_and(|path| path.trim().is_empty()))
    {
        return Err(StoreError::Configuration(format!(
            "redis cache {field} cannot be empty"
        )));
    }
    let configured = tls.iter().filter(|(_, path)| path.is_some()).count();
    if configured != 0 && configured != tls.len() {
        return Err(StoreError::Configuration(
            "redis cache tls_ca, tls_cert and tls_key must be set together".to_string(),
        ));
    }
    Ok(())
}

/// Whether the configuration carries client TLS material.
pub fn uses_tls(config: &CacheConfig) -> bool {
    config.tls_ca.is_some() && config.tls_cert.is_some() && config.tls_key.is_some()
}

/// Connection URL without credentials; they are set on the parsed
/// [`ConnectionInfo`] so they never need URL escaping.
pub fn connection_url(config: &CacheConfig) -> String {
    let scheme = if uses_tls(config) { "rediss" } else { "redis" };
    let db = config.db.unwrap_or(DEFAULT_DB);
    format!("{scheme}://{}:{}/{db}", config.addr.trim(), config.port.trim())
}

fn connection_info(config: &CacheConfig) -> StoreResult<ConnectionInfo> {
    let mut info = connection_url(config)
        .into_connection_info()
        .map_err(|err| StoreError::Configuration(format!("invalid redis address: {err}")))?;
    info.redis.username = Some(config.username.clone());
    info.redis.password = Some(config.password.clone());
    Ok(info)
}

async fn tls_certificates(config: &CacheConfig) -> StoreResult<Option<TlsCertificates>> {
    let (Some(ca), Some(cert), Some(key)) = (&config.tls_ca, &config.tls_cert, &config.tls_key)
    else {
        return Ok(None);
    };
    Ok(Some(TlsCertificates {
        client_tls: Some(redis::ClientTlsConfig {
            client_cert: read_pem(cert).await?,
            client_key: read_pem(key).await?,
        }),
        root_cert: Some(read_pem(ca).await?),
    }))
}

async fn read_pem(path: &str) -> StoreResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|err| StoreError::Configuration(format!("failed to read {path}: {err}")))
}

#[async_trait]
impl Cache for RedisCache {
    async fn health_check(&self) -> StoreResult<()> {
        self.ping("health_check").await
    }

    async fn add_data(&self, key: &str, value: Value) -> StoreResult<String> {
        require_non_empty("add_data", "key", key)?;
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("JSON.SET")
            .arg(key)
            .arg(ROOT_PATH)
            .arg(value.to_string())
            .query_async(&mut connection)
            .await
            .map_err(|err| StoreError::backend("add_data", err))?;
        Ok(WRITE_ACK.to_string())
    }

    async fn get_data(&self, key: &str) -> StoreResult<Value> {
        require_non_empty("get_data", "key", key)?;
        let mut connection = self.connection.clone();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .arg(ROOT_PATH)
            .query_async(&mut connection)
            .await
            .map_err(|err| StoreError::backend("get_data", err))?;
        let raw = raw.ok_or_else(|| StoreError::not_found("get_data", format!("key {key}")))?;
        serde_json::from_str(&raw).map_err(|err| StoreError::backend("get_data", err))
    }

    async fn get_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        if pattern.is_empty() {
            return self.scan_all().await;
        }
        let mut connection = self.connection.clone();
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut connection)
            .await
            .map_err(|err| StoreError::backend("get_keys", err))
    }

    async fn delete_data(&self, key: &str) -> StoreResult<u64> {
        require_non_empty("delete_data", "key", key)?;
        let mut connection = self.connection.clone();
        redis::cmd("JSON.DEL")
            .arg(key)
            .arg(ROOT_PATH)
            .query_async(&mut connection)
            .await
            .map_err(|err| StoreError::backend("delete_data", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CacheBackend;

    fn config() -> CacheConfig {
        CacheConfig {
            backend: CacheBackend::Redis,
            addr: "cache.internal".to_string(),
            port: "6379".to_string(),
            username: "svc".to_string(),
            password: "s3cr3t".to_string(),
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(validate(&config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        for field in ["addr", "port", "username", "password"] {
            let mut config = config();
            match field {
                "addr" => config.addr.clear(),
                "port" => config.port.clear(),
                "username" => config.username.clear(),
                _ => config.password.clear(),
            }
            match validate(&config) {
                Err(StoreError::Configuration(reason)) => assert!(reason.contains(field), "{reason}"),
                other => panic!("expected Configuration error for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_port_and_db() {
        let mut bad_port = config();
        bad_port.port = "redis".to_string();
        assert!(matches!(validate(&bad_port), Err(StoreError::Configuration(_))));

        let mut bad_db = config();
        bad_db.db = Some(-1);
        assert!(matches!(validate(&bad_db), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_validate_tls_material() {
        let mut empty = config();
        empty.tls_ca = Some(String::new());
        assert!(matches!(validate(&empty), Err(StoreError::Configuration(_))));

        let mut partial = config();
        partial.tls_ca = Some("/etc/redis/ca.pem".to_string());
        assert!(matches!(validate(&partial), Err(StoreError::Configuration(_))));

        let mut complete = partial;
        complete.tls_cert = Some("/etc/redis/client.pem".to_string());
        complete.tls_key = Some("/etc/redis/client.key".to_string());
        assert!(validate(&complete).is_ok());
        assert!(uses_tls(&complete));
    }

    #[test]
    fn test_connection_url() {
        assert_eq!(connection_url(&config()), "redis://cache.internal:6379/0");

        let mut tls = config();
        tls.db = Some(3);
        tls.tls_ca = Some("ca.pem".to_string());
        tls.tls_cert = Some("client.pem".to_string());
        tls.tls_key = Some("client.key".to_string());
        assert_eq!(connection_url(&tls), "rediss://cache.internal:6379/3");
    }

    #[test]
    fn test_credentials_kept_out_of_url() {
        let mut config = config();
        config.password = "p@ss/word".to_string();
        let info = connection_info(&config).unwrap();
        assert_eq!(info.redis.username.as_deref(), Some("svc"));
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/word"));
        assert_eq!(info.redis.db, 0);
        assert!(!connection_url(&config).contains("p@ss"));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config_before_io() {
        let mut config = config();
        config.addr.clear();
        assert!(matches!(
            RedisCache::connect(&config).await,
            Err(StoreError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_tls_file_is_configuration_error() {
        let mut config = config();
        config.tls_ca = Some("/nonexistent/ca.pem".to_string());
        config.tls_cert = Some("/nonexistent/client.pem".to_string());
        config.tls_key = Some("/nonexistent/client.key".to_string());
        assert!(matches!(
            RedisCache::connect(&config).await,
            Err(StoreError::Configuration(_))
        ));
    }
}
