//! Broker seam used by the messaging services.
//!
//! The services never talk to a broker client library directly. They go
//! through these traits, which a backend adapter implements once:
//!
//! - [`BrokerConnector`] builds a [`BrokerConnection`] from seed addresses
//! - a [`BrokerConnection`] hands out short-lived [`Publisher`]s and
//!   [`ConsumerGroup`] memberships and answers metadata queries
//! - a [`ConsumerGroup`] produces one [`GroupSession`] per successful join
//! - a [`GroupSession`] owns the [`PartitionClaim`]s of its assignment and
//!   commits progress for them
//!
//! A claim's `next_message` returning `None` is the signal that the session is
//! over, either because the group rebalanced or because the session ended.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::models::{
    BrokerInfo, ConsumedMessage, DeliveryReceipt, ProducerMessage, ProtocolVersion, TopicPartition,
};

/// Failures reported by a broker backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("unable to connect to broker: {0}")]
    Unreachable(String),

    #[error("broker rejected request: {0}")]
    Rejected(String),

    #[error("group rebalance in progress")]
    RebalanceInProgress,

    #[error("unknown group member: {0}")]
    UnknownMember(String),

    #[error("illegal generation {0}")]
    IllegalGeneration(u64),

    #[error("not the group coordinator")]
    NotCoordinator,

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Errors after which leaving the stale session and joining again is the
    /// correct reaction. Everything else terminates the consumer.
    pub const fn is_rejoinable(&self) -> bool {
        matches!(
            self,
            Self::RebalanceInProgress
                | Self::UnknownMember(_)
                | Self::IllegalGeneration(_)
                | Self::NotCoordinator
        )
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Builds connections to a broker cluster.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect to the cluster reachable through `seeds`.
    ///
    /// Implementations must not return a partially initialized connection: on
    /// error nothing is retained.
    async fn connect(
        &self,
        seeds: &[String],
        version: ProtocolVersion,
    ) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

/// A live handle to a broker cluster, shared by every caller.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_closed(&self) -> bool;

    async fn close(&self);

    /// Fetch fresh cluster topology from the brokers.
    async fn refresh_metadata(&self) -> BrokerResult<()>;

    /// Brokers known from the last metadata refresh.
    fn brokers(&self) -> Vec<BrokerInfo>;

    /// Open a synchronous publisher bound to this connection.
    async fn publisher(&self) -> BrokerResult<Box<dyn Publisher>>;

    /// Create a consumer group membership bound to this connection.
    async fn consumer_group(&self, group_id: &str) -> BrokerResult<Box<dyn ConsumerGroup>>;
}

/// Single-use synchronous publisher.
#[async_trait]
pub trait Publisher: Send {
    /// Send one message and wait for the broker acknowledgement.
    async fn send(&mut self, message: &ProducerMessage) -> BrokerResult<DeliveryReceipt>;

    async fn close(self: Box<Self>);
}

/// Membership in a consumer group.
#[async_trait]
pub trait ConsumerGroup: Send {
    /// Join the group for `topics`; resolves once the coordinator hands this
    /// member an assignment.
    async fn join(&mut self, topics: &[String]) -> BrokerResult<Box<dyn GroupSession>>;

    /// Leave the group, releasing any assignment.
    async fn leave(self: Box<Self>);
}

/// One generation of a consumer group join.
#[async_trait]
pub trait GroupSession: Send + Sync {
    fn generation(&self) -> u64;

    fn assignment(&self) -> Vec<TopicPartition>;

    /// Hand over the claims of this session. Subsequent calls return nothing.
    fn take_claims(&mut self) -> Vec<Box<dyn PartitionClaim>>;

    /// Record `message` as processed; the committed position becomes
    /// `message.offset + 1`.
    async fn mark_message(&self, message: &ConsumedMessage) -> BrokerResult<()>;

    /// Resolves once the group has moved past this session's generation.
    async fn rebalanced(&self);

    async fn end(self: Box<Self>);
}

/// Lazy message sequence for one partition of a session.
#[async_trait]
pub trait PartitionClaim: Send {
    fn topic(&self) -> &str;

    fn partition(&self) -> i32;

    /// Next message, or `None` once the claim closed.
    async fn next_message(&mut self) -> Option<ConsumedMessage>;
}
