//! Datastore - uniform clients for a cache, a document store, and a message
//! queue.
//!
//! The message queue is the core: a lazily connected, shared broker
//! connection; a synchronous producer; a consumer group coordinator with
//! at-least-once delivery; and a broker health probe.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, port traits, and the error taxonomy
//! - **Service Layer** (`services`): connection lifecycle, publishing, and
//!   consumer coordination over the broker seam
//! - **Adapters** (`adapters`): in-memory, Kafka, and MongoDB backends
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging,
//!   and wiring
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use datastore::adapters::memory::InMemoryBroker;
//! use datastore::domain::models::ProtocolVersion;
//! use datastore::domain::ports::MessageQueue;
//! use datastore::infrastructure::logging::NullLogger;
//! use datastore::services::BrokerMessageQueue;
//!
//! # tokio_test::block_on(async {
//! let broker = InMemoryBroker::new(1);
//! let queue = BrokerMessageQueue::new(
//!     Arc::new(broker.connector()),
//!     vec!["broker1:9092".to_string()],
//!     ProtocolVersion::V2_0_0,
//!     Arc::new(NullLogger),
//! )?;
//!
//! let receipt = queue.produce_message("orders", "hello").await?;
//! assert_eq!((receipt.partition, receipt.offset), (0, 0));
//! # Ok::<(), datastore::domain::StoreError>(())
//! # }).unwrap();
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{Config, ConsumedMessage, DeliveryReceipt, ProtocolVersion};
pub use domain::ports::{Cache, DocumentStore, MessageHandler, MessageQueue};
pub use domain::{StoreError, StoreResult};
pub use services::BrokerMessageQueue;
