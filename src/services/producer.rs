//! Publish path: one connection lookup, one single-use publisher, one message.

use serde_json::json;
use std::sync::Arc;

use crate::domain::errors::{require_non_empty, StoreError, StoreResult};
use crate::domain::models::{DeliveryReceipt, ProducerMessage};
use crate::domain::ports::{fields, Level, Logger};
use crate::services::connection_manager::ConnectionManager;

const OPERATION: &str = "produce_message";

/// Publishes messages through the shared connection.
///
/// The publisher is opened and closed inside each call. No retry is attempted;
/// a failed publish is returned to the caller, who owns the retry policy.
pub struct Producer {
    connections: Arc<ConnectionManager>,
    logger: Arc<dyn Logger>,
}

impl Producer {
    pub fn new(connections: Arc<ConnectionManager>, logger: Arc<dyn Logger>) -> Self {
        Self {
            connections,
            logger,
        }
    }

    pub async fn publish(&self, topic: &str, message: &str) -> StoreResult<DeliveryReceipt> {
        require_non_empty(OPERATION, "topic", topic)?;

        let connection = self.connections.get_connection().await?;
        let mut publisher = connection
            .publisher()
            .await
            .map_err(|source| StoreError::Delivery {
                operation: OPERATION,
                source,
            })?;

        let outgoing = ProducerMessage::new(topic, message.as_bytes());
        let sent = publisher.send(&outgoing).await;
        publisher.close().await;

        let receipt = sent.map_err(|source| StoreError::Delivery {
            operation: OPERATION,
            source,
        })?;

        self.logger
            .log(
                Level::Debug,
                "message sent",
                fields([
                    ("topic", json!(topic)),
                    ("partition", json!(receipt.partition)),
                    ("offset", json!(receipt.offset)),
                ]),
            )
            .await;

        Ok(receipt)
    }
}
