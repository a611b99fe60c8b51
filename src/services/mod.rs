//! Messaging core: connection lifecycle, publishing, consumer group
//! coordination, and health probing.

pub mod connection_manager;
pub mod consumer_coordinator;
pub mod health_probe;
pub mod message_queue_service;
pub mod producer;

pub use connection_manager::{ConnectionManager, ConnectionPhase};
pub use consumer_coordinator::{ConsumerCoordinator, ConsumerPhase, ConsumerStatus};
pub use health_probe::HealthProbe;
pub use message_queue_service::BrokerMessageQueue;
pub use producer::Producer;
