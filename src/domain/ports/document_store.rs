use async_trait::async_trait;

use crate::domain::errors::StoreResult;
use crate::domain::models::{Document, Filter, UpdateOutcome};

/// Document database capability.
///
/// Filters are top-level equality matches. Updates are objects whose keys are
/// operators (`$set`, `$unset`, `$inc`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    /// Release the underlying client. Further calls fail.
    async fn close(&self);

    /// Insert one document, returning its id.
    async fn add_data(&self, collection: &str, document: Document) -> StoreResult<String>;

    /// Insert a non-empty batch, returning ids in input order.
    async fn add_multiple_data(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<String>>;

    /// First document matching `filter`; `NotFound` when nothing matches.
    async fn get_data(&self, collection: &str, filter: Filter) -> StoreResult<Document>;

    async fn get_multiple_data(&self, collection: &str, filter: Filter)
        -> StoreResult<Vec<Document>>;

    async fn update_data(
        &self,
        collection: &str,
        filter: Filter,
        update: Document,
    ) -> StoreResult<UpdateOutcome>;

    async fn update_multiple_data(
        &self,
        collection: &str,
        filter: Filter,
        update: Document,
    ) -> StoreResult<UpdateOutcome>;

    /// Delete the first match, returning the deleted count.
    async fn delete_data(&self, collection: &str, filter: Filter) -> StoreResult<u64>;

    async fn delete_multiple_data(&self, collection: &str, filter: Filter) -> StoreResult<u64>;
}
