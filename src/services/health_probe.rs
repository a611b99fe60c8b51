//! Broker readiness probe.

use std::sync::Arc;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::BrokerInfo;
use crate::domain::ports::{BrokerError, Logger};
use crate::services::connection_manager::ConnectionManager;

const OPERATION: &str = "health_check";

/// Refreshes cluster metadata and requires at least one known broker.
///
/// Read-only: it touches neither consumer offsets nor producer state, so it is
/// safe to run alongside publishes and consume loops.
pub struct HealthProbe {
    connections: Arc<ConnectionManager>,
    logger: Arc<dyn Logger>,
}

impl HealthProbe {
    pub fn new(connections: Arc<ConnectionManager>, logger: Arc<dyn Logger>) -> Self {
        Self {
            connections,
            logger,
        }
    }

    /// Run the probe, returning the brokers seen by the refresh.
    pub async fn check(&self) -> StoreResult<Vec<BrokerInfo>> {
        let connection = self.connections.get_connection().await?;

        connection
            .refresh_metadata()
            .await
            .map_err(|source| StoreError::Connectivity {
                operation: OPERATION,
                source,
            })?;

        let brokers = connection.brokers();
        if brokers.is_empty() {
            return Err(StoreError::Connectivity {
                operation: OPERATION,
                source: BrokerError::Unreachable("no brokers available".to_string()),
            });
        }

        let addresses: Vec<&str> = brokers.iter().map(|b| b.address.as_str()).collect();
        self.logger
            .debug(&format!("broker cluster healthy, brokers: {addresses:?}"))
            .await;

        Ok(brokers)
    }
}
