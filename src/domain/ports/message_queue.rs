use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::StoreResult;
use crate::domain::models::{ConsumedMessage, DeliveryReceipt};

/// Per-message callback driven by a consumer session.
///
/// The offset of a message is committed only after `handle` returns `Ok`.
/// Returning an error stops the consumer without committing that message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ConsumedMessage) -> StoreResult<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(ConsumedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = StoreResult<()>> + Send,
{
    async fn handle(&self, message: &ConsumedMessage) -> StoreResult<()> {
        (self)(message.clone()).await
    }
}

/// Publish/subscribe capability.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Verify at least one broker is reachable.
    async fn health_check(&self) -> StoreResult<()>;

    /// Publish `message` to `topic`, returning where the broker stored it.
    async fn produce_message(&self, topic: &str, message: &str) -> StoreResult<DeliveryReceipt>;

    /// Join `group_id` for `topic` and feed every delivered message to
    /// `handler` until `cancel` fires or an unrecoverable error occurs.
    ///
    /// Cancellation is a clean exit and returns `Ok(())`.
    async fn consume_messages(
        &self,
        topic: &str,
        group_id: &str,
        handler: &dyn MessageHandler,
        cancel: CancellationToken,
    ) -> StoreResult<()>;
}
