use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::StoreResult;

/// Key/document cache capability.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    /// Store `value` under `key`, replacing any previous value.
    async fn add_data(&self, key: &str, value: Value) -> StoreResult<String>;

    /// Fetch the value under `key`; `NotFound` when absent.
    async fn get_data(&self, key: &str) -> StoreResult<Value>;

    /// Keys matching a glob `pattern`; an empty pattern lists every key.
    async fn get_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Remove `key`, returning how many entries were deleted.
    async fn delete_data(&self, key: &str) -> StoreResult<u64>;
}
