pub mod config;
pub mod document;
pub mod message;

pub use config::{
    CacheBackend, CacheConfig, Config, DatabaseBackend, DatabaseConfig, LogFormat, LoggingConfig,
    MessagingBackend, MessagingConfig, ProtocolVersion, RotationPolicy,
};
pub use document::{filter_matches, Document, Filter, UpdateOutcome, UPDATE_OPERATORS};
pub use message::{BrokerInfo, ConsumedMessage, DeliveryReceipt, ProducerMessage, TopicPartition};
