//! Consumer group coordinator.
//!
//! Drives one consumer group membership through an explicit state machine:
//!
//! ```text
//! Idle -> Joining -> Ready -> Claiming -> Rebalancing -> Joining -> ...
//!   any state -> Terminated (cancellation or unrecoverable error)
//! ```
//!
//! While claiming, every partition of the assignment runs its own loop:
//! wait for the next message, run the handler, commit the offset, repeat.
//! The commit always follows a successful handler call, so a restart
//! redelivers anything that was not fully processed (at-least-once).
//!
//! The loop only ends on cancellation (clean `Ok(())`) or an unrecoverable
//! error. Rebalance-class broker errors send it back to `Joining`.

use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{require_non_empty, StoreError, StoreResult};
use crate::domain::ports::{
    fields, ConsumerGroup, GroupSession, Level, Logger, MessageHandler, PartitionClaim,
};
use crate::services::connection_manager::ConnectionManager;

const OPERATION: &str = "consume_messages";

/// Default pause before rejoining after a rebalance-class join error.
pub const DEFAULT_REJOIN_BACKOFF: Duration = Duration::from_millis(250);

/// Phase of the consumer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPhase {
    Idle,
    Joining,
    Ready,
    Claiming,
    Rebalancing,
    Terminated,
}

impl std::fmt::Display for ConsumerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Ready => "ready",
            Self::Claiming => "claiming",
            Self::Rebalancing => "rebalancing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Snapshot published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStatus {
    pub phase: ConsumerPhase,
    /// Generation of the current (or last) session
    pub generation: Option<u64>,
    /// Sessions that reached `Ready`; raised exactly once per session
    pub sessions_ready: u64,
    /// Messages handled and committed
    pub committed: u64,
}

impl Default for ConsumerStatus {
    fn default() -> Self {
        Self {
            phase: ConsumerPhase::Idle,
            generation: None,
            sessions_ready: 0,
            committed: 0,
        }
    }
}

/// How a session's claiming phase ended.
enum SessionEnd {
    Cancelled,
    Rebalanced,
    Failed(StoreError),
}

pub struct ConsumerCoordinator {
    connections: Arc<ConnectionManager>,
    logger: Arc<dyn Logger>,
    rejoin_backoff: Duration,
    status: watch::Sender<ConsumerStatus>,
}

impl ConsumerCoordinator {
    pub fn new(connections: Arc<ConnectionManager>, logger: Arc<dyn Logger>) -> Self {
        let (status, _) = watch::channel(ConsumerStatus::default());
        Self {
            connections,
            logger,
            rejoin_backoff: DEFAULT_REJOIN_BACKOFF,
            status,
        }
    }

    #[must_use]
    pub const fn with_rejoin_backoff(mut self, backoff: Duration) -> Self {
        self.rejoin_backoff = backoff;
        self
    }

    /// Watch phase transitions and session readiness.
    pub fn subscribe(&self) -> watch::Receiver<ConsumerStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ConsumerStatus {
        *self.status.borrow()
    }

    /// Consume `topic` as a member of `group_id` until `cancel` fires or an
    /// unrecoverable error occurs.
    pub async fn run(
        &self,
        topic: &str,
        group_id: &str,
        handler: &dyn MessageHandler,
        cancel: CancellationToken,
    ) -> StoreResult<()> {
        require_non_empty(OPERATION, "topic", topic)?;
        require_non_empty(OPERATION, "group_id", group_id)?;

        let result = self.drive(topic, group_id, handler, &cancel).await;
        self.transition(ConsumerPhase::Terminated);

        match &result {
            Ok(()) => self.logger.info("consumer stopped").await,
            Err(err) => {
                self.logger
                    .log(
                        Level::Error,
                        "consumer terminated",
                        fields([("group_id", json!(group_id)), ("error", json!(err.to_string()))]),
                    )
                    .await;
            }
        }
        result
    }

    async fn drive(
        &self,
        topic: &str,
        group_id: &str,
        handler: &dyn MessageHandler,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        self.transition(ConsumerPhase::Joining);

        let connection = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            connection = self.connections.get_connection() => connection?,
        };

        let mut group = connection
            .consumer_group(group_id)
            .await
            .map_err(|source| StoreError::Session {
                operation: OPERATION,
                source,
            })?;

        let topics = vec![topic.to_string()];
        let outcome = self
            .session_loop(group.as_mut(), &topics, group_id, handler, cancel)
            .await;
        group.leave().await;
        outcome
    }

    async fn session_loop(
        &self,
        group: &mut dyn ConsumerGroup,
        topics: &[String],
        group_id: &str,
        handler: &dyn MessageHandler,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        loop {
            self.transition(ConsumerPhase::Joining);

            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                joined = group.join(topics) => joined,
            };

            let mut session = match joined {
                Ok(session) => session,
                Err(err) if err.is_rejoinable() => {
                    self.logger
                        .warn(&format!("group join interrupted, rejoining: {err}"))
                        .await;
                    self.transition(ConsumerPhase::Rebalancing);
                    if self.pause(cancel).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(source) => {
                    return Err(StoreError::Session {
                        operation: OPERATION,
                        source,
                    })
                }
            };

            self.mark_ready(session.generation());
            self.logger
                .log(
                    Level::Info,
                    "consumer session ready",
                    fields([
                        ("group_id", json!(group_id)),
                        ("generation", json!(session.generation())),
                        ("partitions", json!(session.assignment().len())),
                    ]),
                )
                .await;

            let claims = session.take_claims();
            let end = self.claim_all(session.as_ref(), claims, handler, cancel).await;
            session.end().await;

            match end {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::Failed(err) => return Err(err),
                SessionEnd::Rebalanced => {
                    self.transition(ConsumerPhase::Rebalancing);
                    self.logger.debug("session rebalanced, rejoining").await;
                }
            }
        }
    }

    async fn claim_all(
        &self,
        session: &dyn GroupSession,
        claims: Vec<Box<dyn PartitionClaim>>,
        handler: &dyn MessageHandler,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        self.transition(ConsumerPhase::Claiming);

        // Stops sibling claims when one of them fails.
        let stop = cancel.child_token();

        if claims.is_empty() {
            // Nothing assigned to this member; wait for the next generation.
            tokio::select! {
                biased;
                () = stop.cancelled() => {}
                () = session.rebalanced() => {}
            }
        } else {
            let results = join_all(
                claims
                    .into_iter()
                    .map(|claim| self.claim_loop(claim, session, handler, &stop)),
            )
            .await;

            if let Some(err) = results.into_iter().find_map(Result::err) {
                return SessionEnd::Failed(err);
            }
        }

        if cancel.is_cancelled() {
            SessionEnd::Cancelled
        } else {
            SessionEnd::Rebalanced
        }
    }

    async fn claim_loop(
        &self,
        mut claim: Box<dyn PartitionClaim>,
        session: &dyn GroupSession,
        handler: &dyn MessageHandler,
        stop: &CancellationToken,
    ) -> StoreResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                () = stop.cancelled() => return Ok(()),
                next = claim.next_message() => next,
            };

            let Some(message) = next else {
                return Ok(());
            };

            if let Err(err) = handler.handle(&message).await {
                stop.cancel();
                return Err(StoreError::Handler {
                    topic: message.topic.clone(),
                    partition: message.partition,
                    offset: message.offset,
                    reason: err.to_string(),
                });
            }

            match session.mark_message(&message).await {
                Ok(()) => self.record_commit(),
                // The group moved on; the message is redelivered to the next owner.
                Err(err) if err.is_rejoinable() => return Ok(()),
                Err(source) => {
                    stop.cancel();
                    return Err(StoreError::Session {
                        operation: OPERATION,
                        source,
                    });
                }
            }
        }
    }

    /// Sleep for the rejoin backoff. Returns true when cancelled meanwhile.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => true,
            () = tokio::time::sleep(self.rejoin_backoff) => false,
        }
    }

    fn transition(&self, phase: ConsumerPhase) {
        self.status.send_modify(|status| status.phase = phase);
    }

    fn mark_ready(&self, generation: u64) {
        self.status.send_modify(|status| {
            status.phase = ConsumerPhase::Ready;
            status.generation = Some(generation);
            status.sessions_ready += 1;
        });
    }

    fn record_commit(&self) {
        self.status.send_modify(|status| status.committed += 1);
    }
}
