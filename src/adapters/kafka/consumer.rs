use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::error::{is_fatal_consume_error, map_kafka_error};
use crate::domain::models::{ConsumedMessage, TopicPartition};
use crate::domain::ports::{BrokerError, BrokerResult, ConsumerGroup, GroupSession, PartitionClaim};

/// How often the driver compares the consumer's assignment with the last one seen.
const ASSIGNMENT_POLL: Duration = Duration::from_millis(200);

/// Per-claim buffer between the driver and the handler.
const CLAIM_BUFFER: usize = 256;

type Routes = Arc<Mutex<RouteTable>>;

#[derive(Default)]
struct RouteTable {
    senders: HashMap<TopicPartition, mpsc::Sender<ConsumedMessage>>,
    /// Partitions paused for lack of a claim, with the offset they were rewound to
    held: HashMap<TopicPartition, i64>,
}

/// How the driver parks a message that was not delivered to a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewind {
    /// Already covered by an earlier rewind of the same partition.
    Skip,
    /// A claim exists; refetch from the offset.
    Seek,
    /// No claim; stop fetching the partition and refetch from the offset.
    PauseAndSeek,
}

impl RouteTable {
    fn rewind(&mut self, tp: &TopicPartition, offset: i64) -> Rewind {
        let claimed = self.senders.get(tp).is_some_and(|tx| !tx.is_closed());
        if claimed {
            return Rewind::Seek;
        }
        // Prefetched messages past the rewind point are dropped.
        if self.held.get(tp).is_some_and(|&held| offset > held) {
            return Rewind::Skip;
        }
        self.held.insert(tp.clone(), offset);
        Rewind::PauseAndSeek
    }

    /// Stop holding `partitions`, returning those that were paused.
    fn release(&mut self, partitions: &[TopicPartition]) -> Vec<TopicPartition> {
        partitions
            .iter()
            .filter(|tp| self.held.remove(*tp).is_some())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Assignment {
    generation: u64,
    partitions: Vec<TopicPartition>,
    /// Unrecoverable consume failure; ends every session of the membership
    fault: Option<BrokerError>,
}

impl Assignment {
    fn is_current(&self, generation: u64) -> bool {
        self.fault.is_none() && self.generation == generation
    }
}

pub(super) struct KafkaConsumerGroup {
    config: ClientConfig,
    timeout: Duration,
    active: Option<ActiveMembership>,
}

struct ActiveMembership {
    consumer: Arc<StreamConsumer>,
    topics: Vec<String>,
    routes: Routes,
    assignment: watch::Receiver<Assignment>,
    driver: CancellationToken,
}

impl KafkaConsumerGroup {
    pub(super) const fn new(config: ClientConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            active: None,
        }
    }

    fn subscribe(&self, topics: &[String]) -> BrokerResult<ActiveMembership> {
        let consumer: StreamConsumer = self
            .config
            .create()
            .map_err(|err| map_kafka_error(&err))?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&names)
            .map_err(|err| map_kafka_error(&err))?;

        let consumer = Arc::new(consumer);
        let routes: Routes = Arc::default();
        let (assignment_tx, assignment) = watch::channel(Assignment::default());
        let driver = CancellationToken::new();
        tokio::spawn(drive(
            Arc::clone(&consumer),
            Arc::clone(&routes),
            assignment_tx,
            driver.clone(),
        ));

        Ok(ActiveMembership {
            consumer,
            topics: topics.to_vec(),
            routes,
            assignment,
            driver,
        })
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    async fn join(&mut self, topics: &[String]) -> BrokerResult<Box<dyn GroupSession>> {
        if self.active.as_ref().is_some_and(|active| active.topics != topics) {
            if let Some(stale) = self.active.take() {
                stale.driver.cancel();
                stale.consumer.unsubscribe();
            }
        }
        if self.active.is_none() {
            self.active = Some(self.subscribe(topics)?);
        }
        let Some(active) = self.active.as_mut() else {
            return Err(BrokerError::Closed);
        };

        let assignment = await_assignment(&mut active.assignment).await?;

        let mut claims: Vec<Box<dyn PartitionClaim>> = Vec::with_capacity(assignment.partitions.len());
        {
            let mut routes = lock(&active.routes);
            for tp in &assignment.partitions {
                let (tx, rx) = mpsc::channel(CLAIM_BUFFER);
                routes.senders.insert(tp.clone(), tx);
                claims.push(Box::new(KafkaClaim {
                    tp: tp.clone(),
                    messages: rx,
                    generation: assignment.generation,
                    generations: active.assignment.clone(),
                }));
            }

            // Resume under the route lock so the driver never pauses a
            // partition that already has a claim.
            let released = routes.release(&assignment.partitions);
            if !released.is_empty() {
                if let Err(err) = active.consumer.resume(&partition_list(&released)) {
                    tracing::warn!(error = %err, "resume of claimed partitions failed");
                }
            }
        }

        Ok(Box::new(KafkaSession {
            consumer: Arc::clone(&active.consumer),
            routes: Arc::clone(&active.routes),
            generations: active.assignment.clone(),
            generation: assignment.generation,
            partitions: assignment.partitions,
            claims: Mutex::new(claims),
            timeout: self.timeout,
        }))
    }

    async fn leave(mut self: Box<Self>) {
        if let Some(active) = self.active.take() {
            active.driver.cancel();
            active.consumer.unsubscribe();
        }
    }
}

/// Wait for the first assignment of the membership. Generation 0 means it
/// has not arrived yet; later joins take whatever assignment is current.
async fn await_assignment(assignment: &mut watch::Receiver<Assignment>) -> BrokerResult<Assignment> {
    let current = assignment
        .wait_for(|assignment| assignment.generation > 0 || assignment.fault.is_some())
        .await
        .map(|assignment| assignment.clone())
        .map_err(|_| BrokerError::Closed)?;

    match current.fault {
        Some(fault) => Err(fault),
        None => Ok(current),
    }
}

/// Poll the consumer until stopped, publishing assignment changes and routing
/// messages to claims.
async fn drive(
    consumer: Arc<StreamConsumer>,
    routes: Routes,
    assignment: watch::Sender<Assignment>,
    stop: CancellationToken,
) {
    let polled = Arc::clone(&consumer);
    let mut stream = polled.stream();
    let mut ticker = tokio::time::interval(ASSIGNMENT_POLL);

    loop {
        let fetched = tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                refresh_assignment(&consumer, &assignment);
                continue;
            }
            next = stream.next() => match next {
                None => break,
                Some(Ok(message)) => to_consumed(&message),
                Some(Err(err)) => {
                    if record_poll_error(&assignment, &err) {
                        break;
                    }
                    continue;
                }
            },
        };

        refresh_assignment(&consumer, &assignment);
        let tp = TopicPartition::new(fetched.topic.clone(), fetched.partition);
        let offset = fetched.offset;
        let route = lock(&routes).senders.get(&tp).cloned();

        let delivered = match route {
            Some(tx) => loop {
                tokio::select! {
                    () = stop.cancelled() => return,
                    _ = ticker.tick() => refresh_assignment(&consumer, &assignment),
                    permit = tx.reserve() => break match permit {
                        Ok(permit) => {
                            permit.send(fetched);
                            true
                        }
                        Err(_) => false,
                    },
                }
            },
            None => false,
        };

        if !delivered {
            hold_partition(&consumer, &routes, &tp, offset);
        }
    }
}

/// Classify a poll failure. Fatal errors are published to every session of
/// the membership; returns true when the driver should stop.
fn record_poll_error(assignment: &watch::Sender<Assignment>, err: &KafkaError) -> bool {
    let mapped = map_kafka_error(err);
    if !is_fatal_consume_error(&mapped) {
        tracing::warn!(error = %err, "kafka consumer poll failed");
        return false;
    }

    tracing::error!(error = %err, "kafka consumer failed");
    assignment.send_if_modified(|current| {
        if current.fault.is_some() {
            return false;
        }
        current.fault = Some(mapped);
        true
    });
    true
}

/// Park a partition whose message found no live claim: pause fetching and
/// rewind to `offset` so the message is fetched again once a claim exists.
fn hold_partition(consumer: &StreamConsumer, routes: &Routes, tp: &TopicPartition, offset: i64) {
    let mut table = lock(routes);
    match table.rewind(tp, offset) {
        Rewind::Skip => return,
        Rewind::Seek => {}
        Rewind::PauseAndSeek => {
            if let Err(err) = consumer.pause(&partition_list(std::slice::from_ref(tp))) {
                tracing::warn!(topic = %tp.topic, partition = tp.partition, error = %err, "pause failed");
            }
        }
    }

    // A zero timeout makes the seek asynchronous.
    if let Err(err) = consumer.seek(&tp.topic, tp.partition, Offset::Offset(offset), Duration::ZERO) {
        tracing::warn!(
            topic = %tp.topic,
            partition = tp.partition,
            error = %err,
            "rewind of undelivered message failed"
        );
    }
}

fn partition_list(partitions: &[TopicPartition]) -> TopicPartitionList {
    let mut list = TopicPartitionList::new();
    for tp in partitions {
        list.add_partition(&tp.topic, tp.partition);
    }
    list
}

fn refresh_assignment(consumer: &StreamConsumer, assignment: &watch::Sender<Assignment>) {
    let Ok(list) = consumer.assignment() else {
        return;
    };
    let mut partitions: Vec<TopicPartition> = list
        .elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect();
    partitions.sort();

    assignment.send_if_modified(|current| {
        if current.partitions == partitions {
            return false;
        }
        current.generation += 1;
        current.partitions = partitions;
        true
    });
}

fn rewind_to_committed(consumer: &StreamConsumer, partitions: &[TopicPartition], timeout: Duration) {
    let Ok(committed) = consumer.committed_offsets(partition_list(partitions), timeout) else {
        return;
    };
    for elem in committed.elements() {
        let position = match elem.offset() {
            Offset::Offset(offset) => Offset::Offset(offset),
            Offset::Invalid => Offset::Beginning,
            _ => continue,
        };
        if let Err(err) = consumer.seek(elem.topic(), elem.partition(), position, timeout) {
            tracing::debug!(topic = elem.topic(), partition = elem.partition(), error = %err, "seek skipped");
        }
    }
}

fn to_consumed(message: &BorrowedMessage<'_>) -> ConsumedMessage {
    ConsumedMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct KafkaSession {
    consumer: Arc<StreamConsumer>,
    routes: Routes,
    generations: watch::Receiver<Assignment>,
    generation: u64,
    partitions: Vec<TopicPartition>,
    claims: Mutex<Vec<Box<dyn PartitionClaim>>>,
    timeout: Duration,
}

#[async_trait]
impl GroupSession for KafkaSession {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.partitions.clone()
    }

    fn take_claims(&mut self) -> Vec<Box<dyn PartitionClaim>> {
        std::mem::take(self.claims.get_mut().unwrap_or_else(PoisonError::into_inner))
    }

    async fn mark_message(&self, message: &ConsumedMessage) -> BrokerResult<()> {
        {
            let current = self.generations.borrow();
            if let Some(fault) = &current.fault {
                return Err(fault.clone());
            }
            if current.generation != self.generation {
                return Err(BrokerError::IllegalGeneration(self.generation));
            }
        }

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|err| map_kafka_error(&err))?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|err| BrokerError::Protocol(err.to_string()))?
            .map_err(|err| map_kafka_error(&err))
    }

    async fn rebalanced(&self) {
        let mut generations = self.generations.clone();
        loop {
            if !generations.borrow_and_update().is_current(self.generation) {
                return;
            }
            if generations.changed().await.is_err() {
                return;
            }
        }
    }

    async fn end(self: Box<Self>) {
        {
            let mut routes = lock(&self.routes);
            for tp in &self.partitions {
                routes.senders.remove(tp);
            }
        }

        // Buffered but unprocessed messages were already fetched; move the
        // fetch position back so the next session sees them again.
        let consumer = Arc::clone(&self.consumer);
        let partitions = self.partitions.clone();
        let timeout = self.timeout;
        let rewound =
            tokio::task::spawn_blocking(move || rewind_to_committed(&consumer, &partitions, timeout))
                .await;
        if let Err(err) = rewound {
            tracing::warn!(error = %err, "rewind after session end failed");
        }
    }
}

struct KafkaClaim {
    tp: TopicPartition,
    messages: mpsc::Receiver<ConsumedMessage>,
    generation: u64,
    generations: watch::Receiver<Assignment>,
}

#[async_trait]
impl PartitionClaim for KafkaClaim {
    fn topic(&self) -> &str {
        &self.tp.topic
    }

    fn partition(&self) -> i32 {
        self.tp.partition
    }

    async fn next_message(&mut self) -> Option<ConsumedMessage> {
        loop {
            if !self.generations.borrow_and_update().is_current(self.generation) {
                return None;
            }
            tokio::select! {
                message = self.messages.recv() => return message,
                changed = self.generations.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
