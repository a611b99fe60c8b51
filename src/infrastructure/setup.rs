//! Wiring of configured backends into the domain ports.

use std::sync::Arc;

use crate::adapters::memory::{InMemoryBroker, InMemoryCache, InMemoryDocumentStore};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::config::{
    CacheBackend, CacheConfig, DatabaseBackend, DatabaseConfig, MessagingBackend, MessagingConfig,
};
use crate::domain::ports::{BrokerConnector, Cache, DocumentStore, Logger};
use crate::services::BrokerMessageQueue;

/// Connector for the configured message broker backend.
pub fn broker_connector(config: &MessagingConfig) -> StoreResult<Arc<dyn BrokerConnector>> {
    match config.backend {
        MessagingBackend::Memory => {
            Ok(Arc::new(InMemoryBroker::new(config.default_partitions).connector()))
        }
        #[cfg(feature = "kafka")]
        MessagingBackend::Kafka => Ok(Arc::new(crate::adapters::kafka::KafkaConnector::new(
            config.client_id.clone(),
        ))),
        #[cfg(not(feature = "kafka"))]
        MessagingBackend::Kafka => Err(StoreError::Configuration(
            "kafka backend requires the `kafka` feature".to_string(),
        )),
    }
}

/// Message queue over the configured broker.
pub fn build_message_queue(
    config: &MessagingConfig,
    logger: Arc<dyn Logger>,
) -> StoreResult<BrokerMessageQueue> {
    BrokerMessageQueue::from_config(broker_connector(config)?, config, logger)
}

/// Cache for the configured backend; connects and pings eagerly for redis.
pub async fn build_cache(config: &CacheConfig) -> StoreResult<Arc<dyn Cache>> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(InMemoryCache::new())),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => Ok(Arc::new(
            crate::adapters::redis::RedisCache::connect(config).await?,
        )),
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => Err(StoreError::Configuration(
            "redis backend requires the `redis` feature".to_string(),
        )),
    }
}

/// Document store for the configured backend; connects eagerly for remote
/// backends.
pub async fn build_document_store(config: &DatabaseConfig) -> StoreResult<Arc<dyn DocumentStore>> {
    match config.backend {
        DatabaseBackend::Memory => Ok(Arc::new(InMemoryDocumentStore::new())),
        #[cfg(feature = "mongodb")]
        DatabaseBackend::Mongodb => Ok(Arc::new(
            crate::adapters::mongodb::MongoDocumentStore::connect(config).await?,
        )),
        #[cfg(not(feature = "mongodb"))]
        DatabaseBackend::Mongodb => Err(StoreError::Configuration(
            "mongodb backend requires the `mongodb` feature".to_string(),
        )),
    }
}
