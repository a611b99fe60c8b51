//! `MessageQueue` port implementation backed by any broker connector.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::{BrokerInfo, DeliveryReceipt, MessagingConfig, ProtocolVersion};
use crate::domain::ports::{BrokerConnector, Logger, MessageHandler, MessageQueue};
use crate::services::connection_manager::ConnectionManager;
use crate::services::consumer_coordinator::ConsumerCoordinator;
use crate::services::health_probe::HealthProbe;
use crate::services::producer::Producer;

/// Message queue capability composed from the connection manager, producer,
/// consumer coordinator, and health probe.
///
/// Each instance owns its own connection; instances share no state.
pub struct BrokerMessageQueue {
    connections: Arc<ConnectionManager>,
    producer: Producer,
    health: HealthProbe,
    logger: Arc<dyn Logger>,
    rejoin_backoff: Duration,
}

impl BrokerMessageQueue {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        seeds: Vec<String>,
        version: ProtocolVersion,
        logger: Arc<dyn Logger>,
    ) -> StoreResult<Self> {
        let connections = Arc::new(ConnectionManager::new(
            connector,
            seeds,
            version,
            Arc::clone(&logger),
        )?);

        Ok(Self {
            producer: Producer::new(Arc::clone(&connections), Arc::clone(&logger)),
            health: HealthProbe::new(Arc::clone(&connections), Arc::clone(&logger)),
            connections,
            logger,
            rejoin_backoff: crate::services::consumer_coordinator::DEFAULT_REJOIN_BACKOFF,
        })
    }

    /// Build from configuration, validating the protocol version.
    pub fn from_config(
        connector: Arc<dyn BrokerConnector>,
        config: &MessagingConfig,
        logger: Arc<dyn Logger>,
    ) -> StoreResult<Self> {
        let version: ProtocolVersion = config
            .protocol_version
            .parse()
            .map_err(StoreError::Configuration)?;

        Ok(Self::new(connector, config.brokers.clone(), version, logger)?
            .with_rejoin_backoff(Duration::from_millis(config.rejoin_backoff_ms)))
    }

    #[must_use]
    pub const fn with_rejoin_backoff(mut self, backoff: Duration) -> Self {
        self.rejoin_backoff = backoff;
        self
    }

    /// A coordinator bound to this queue's connection, for callers that want
    /// to observe consumer state transitions.
    pub fn coordinator(&self) -> ConsumerCoordinator {
        ConsumerCoordinator::new(Arc::clone(&self.connections), Arc::clone(&self.logger))
            .with_rejoin_backoff(self.rejoin_backoff)
    }

    pub const fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Brokers seen by a fresh metadata refresh.
    pub async fn brokers(&self) -> StoreResult<Vec<BrokerInfo>> {
        self.health.check().await
    }

    /// Tear down the shared connection.
    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
    }
}

#[async_trait]
impl MessageQueue for BrokerMessageQueue {
    async fn health_check(&self) -> StoreResult<()> {
        self.health.check().await.map(|_| ())
    }

    async fn produce_message(&self, topic: &str, message: &str) -> StoreResult<DeliveryReceipt> {
        self.producer.publish(topic, message).await
    }

    async fn consume_messages(
        &self,
        topic: &str,
        group_id: &str,
        handler: &dyn MessageHandler,
        cancel: CancellationToken,
    ) -> StoreResult<()> {
        self.coordinator()
            .run(topic, group_id, handler, cancel)
            .await
    }
}
