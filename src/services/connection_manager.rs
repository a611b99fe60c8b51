//! Lazily created, shared broker connection.
//!
//! Every producer, consumer, and health call asks the manager for a
//! connection. The first call creates it; later calls reuse it while it
//! reports itself open; a closed handle is replaced on the next call. The
//! check and the create run under one lock so concurrent callers never build
//! two connections.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::ProtocolVersion;
use crate::domain::ports::{fields, BrokerConnection, BrokerConnector, Level, Logger};

const OPERATION: &str = "get_connection";

enum ConnectionState {
    Uninitialized,
    Live(Arc<dyn BrokerConnection>),
    Closed,
}

/// Observable state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No connection has been created yet
    Uninitialized,
    /// A usable connection is held
    Live,
    /// The held connection was shut down or reports itself closed
    Closed,
}

pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    seeds: Vec<String>,
    version: ProtocolVersion,
    state: Mutex<ConnectionState>,
    logger: Arc<dyn Logger>,
}

impl ConnectionManager {
    /// Create a manager for `seeds`. No connection is attempted here.
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        seeds: Vec<String>,
        version: ProtocolVersion,
        logger: Arc<dyn Logger>,
    ) -> StoreResult<Self> {
        if seeds.is_empty() {
            return Err(StoreError::Configuration(
                "at least one seed broker address is required".to_string(),
            ));
        }
        if seeds.iter().any(|seed| seed.trim().is_empty()) {
            return Err(StoreError::Configuration(
                "seed broker addresses cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            connector,
            seeds,
            version,
            state: Mutex::new(ConnectionState::Uninitialized),
            logger,
        })
    }

    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Return the live connection, creating or replacing it when needed.
    pub async fn get_connection(&self) -> StoreResult<Arc<dyn BrokerConnection>> {
        let mut state = self.state.lock().await;

        if let ConnectionState::Live(connection) = &*state {
            if !connection.is_closed() {
                return Ok(Arc::clone(connection));
            }
            self.logger
                .warn("broker connection reports closed, replacing it")
                .await;
        }

        // Nothing usable is stored from here on, whatever the outcome.
        *state = ConnectionState::Uninitialized;

        self.logger
            .log(
                Level::Info,
                "creating broker connection",
                fields([
                    ("seeds", serde_json::json!(self.seeds)),
                    ("version", serde_json::json!(self.version.to_string())),
                ]),
            )
            .await;

        let connection = self
            .connector
            .connect(&self.seeds, self.version)
            .await
            .map_err(|source| StoreError::Connectivity {
                operation: OPERATION,
                source,
            })?;

        *state = ConnectionState::Live(Arc::clone(&connection));
        Ok(connection)
    }

    /// Close the held connection. The next `get_connection` creates a new one.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let ConnectionState::Live(connection) =
            std::mem::replace(&mut *state, ConnectionState::Closed)
        {
            connection.close().await;
            self.logger.info("broker connection closed").await;
        }
    }

    pub async fn phase(&self) -> ConnectionPhase {
        match &*self.state.lock().await {
            ConnectionState::Uninitialized => ConnectionPhase::Uninitialized,
            ConnectionState::Live(connection) if !connection.is_closed() => ConnectionPhase::Live,
            ConnectionState::Live(_) | ConnectionState::Closed => ConnectionPhase::Closed,
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("seeds", &self.seeds)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
