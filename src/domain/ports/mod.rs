//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async trait interfaces that backend adapters implement:
//! - Cache: key/document cache operations
//! - DocumentStore: document database operations
//! - MessageQueue: publish/subscribe operations
//! - Broker*: the seam the messaging services drive a broker through
//! - Logger: structured diagnostic narration
//!
//! Application code depends on these traits only, so a backend can be swapped
//! without touching call sites.

pub mod broker;
pub mod cache;
pub mod document_store;
pub mod logger;
pub mod message_queue;

pub use broker::{
    BrokerConnection, BrokerConnector, BrokerError, BrokerResult, ConsumerGroup, GroupSession,
    PartitionClaim, Publisher,
};
pub use cache::Cache;
pub use document_store::DocumentStore;
pub use logger::{fields, Level, Logger};
pub use message_queue::{MessageHandler, MessageQueue};
