//! In-process backends for every capability.

pub mod broker;
pub mod cache;
pub mod document_store;

pub use broker::{InMemoryBroker, InMemoryConnection, InMemoryConnector};
pub use cache::InMemoryCache;
pub use document_store::InMemoryDocumentStore;
