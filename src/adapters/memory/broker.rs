//! In-process broker implementing the broker seam.
//!
//! Topics are created on first use with a fixed partition count. Partitions
//! are append-only logs whose offsets start at 0. Consumer groups track
//! members, a generation counter, a round-robin assignment, and committed
//! offsets. Any membership change bumps the generation, which closes every
//! claim of the previous generation.
//!
//! Locks are `std::sync::Mutex` and never held across an await. When both are
//! needed, a group lock is taken before the topic table lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{
    BrokerInfo, ConsumedMessage, DeliveryReceipt, ProducerMessage, ProtocolVersion, TopicPartition,
};
use crate::domain::ports::{
    BrokerConnection, BrokerConnector, BrokerError, BrokerResult, ConsumerGroup, GroupSession,
    PartitionClaim, Publisher,
};

/// Shared in-memory broker cluster. Cloning yields another handle to the same
/// cluster.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

struct BrokerState {
    default_partitions: u32,
    reachable: AtomicBool,
    advertise_brokers: AtomicBool,
    connect_attempts: AtomicUsize,
    connections_created: AtomicUsize,
    connect_delay_ms: AtomicU64,
    next_member: AtomicU64,
    publish_rejection: Mutex<Option<String>>,
    join_failures: Mutex<VecDeque<BrokerError>>,
    topics: Mutex<HashMap<String, Arc<TopicLog>>>,
    groups: Mutex<HashMap<String, Arc<GroupState>>>,
}

struct TopicLog {
    partitions: Vec<Arc<PartitionLog>>,
    next_partition: AtomicUsize,
}

struct PartitionLog {
    records: Mutex<Vec<StoredRecord>>,
    high_watermark: watch::Sender<i64>,
}

#[derive(Clone)]
struct StoredRecord {
    value: Vec<u8>,
    timestamp: DateTime<Utc>,
}

struct GroupState {
    members: Mutex<GroupMembers>,
    generation: watch::Sender<u64>,
}

#[derive(Default)]
struct GroupMembers {
    generation: u64,
    subscriptions: BTreeMap<String, Vec<String>>,
    assignments: HashMap<String, Vec<TopicPartition>>,
    committed: HashMap<TopicPartition, i64>,
}

impl InMemoryBroker {
    /// New cluster whose auto-created topics get `default_partitions`
    /// partitions (at least one).
    pub fn new(default_partitions: u32) -> Self {
        Self {
            state: Arc::new(BrokerState {
                default_partitions: default_partitions.max(1),
                reachable: AtomicBool::new(true),
                advertise_brokers: AtomicBool::new(true),
                connect_attempts: AtomicUsize::new(0),
                connections_created: AtomicUsize::new(0),
                connect_delay_ms: AtomicU64::new(0),
                next_member: AtomicU64::new(1),
                publish_rejection: Mutex::new(None),
                join_failures: Mutex::new(VecDeque::new()),
                topics: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            state: Arc::clone(&self.state),
        }
    }

    /// Create `topic` with an explicit partition count. No-op if it exists.
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        self.state.topic_with(topic, partitions.max(1));
    }

    /// When false, connects and metadata refreshes fail as unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// When false, metadata refreshes succeed but report no brokers.
    pub fn set_advertise_brokers(&self, advertise: bool) {
        self.state.advertise_brokers.store(advertise, Ordering::SeqCst);
    }

    /// Delay every connect by `delay`, widening the window for races.
    pub fn set_connect_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.connect_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Reject every publish with `reason` until cleared with `None`.
    pub fn set_publish_rejection(&self, reason: Option<&str>) {
        *lock(&self.state.publish_rejection) = reason.map(str::to_string);
    }

    /// Fail the next group join with `error`.
    pub fn fail_next_join(&self, error: BrokerError) {
        lock(&self.state.join_failures).push_back(error);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn connections_created(&self) -> usize {
        self.state.connections_created.load(Ordering::SeqCst)
    }

    /// Next offset the group will read from, if it committed anything.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        let group = lock(&self.state.groups).get(group_id).cloned()?;
        let members = lock(&group.members);
        members
            .committed
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    pub fn group_generation(&self, group_id: &str) -> Option<u64> {
        let group = lock(&self.state.groups).get(group_id).cloned()?;
        let generation = lock(&group.members).generation;
        Some(generation)
    }

    pub fn group_members(&self, group_id: &str) -> usize {
        lock(&self.state.groups)
            .get(group_id)
            .map_or(0, |group| lock(&group.members).subscriptions.len())
    }

    /// Offset the next published message to `topic`/`partition` will get.
    pub fn high_watermark(&self, topic: &str, partition: i32) -> Option<i64> {
        let log = lock(&self.state.topics).get(topic).cloned()?;
        let partition = log.partitions.get(usize::try_from(partition).ok()?)?;
        let watermark = *partition.high_watermark.borrow();
        Some(watermark)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

impl BrokerState {
    fn topic(&self, topic: &str) -> Arc<TopicLog> {
        self.topic_with(topic, self.default_partitions)
    }

    fn topic_with(&self, topic: &str, partitions: u32) -> Arc<TopicLog> {
        let mut topics = lock(&self.topics);
        Arc::clone(topics.entry(topic.to_string()).or_insert_with(|| {
            Arc::new(TopicLog {
                partitions: (0..partitions)
                    .map(|_| {
                        let (high_watermark, _) = watch::channel(0);
                        Arc::new(PartitionLog {
                            records: Mutex::new(Vec::new()),
                            high_watermark,
                        })
                    })
                    .collect(),
                next_partition: AtomicUsize::new(0),
            })
        }))
    }

    fn partition(&self, tp: &TopicPartition) -> Option<Arc<PartitionLog>> {
        let log = self.topic(&tp.topic);
        let index = usize::try_from(tp.partition).ok()?;
        log.partitions.get(index).cloned()
    }

    fn append(&self, message: &ProducerMessage) -> BrokerResult<DeliveryReceipt> {
        if let Some(reason) = lock(&self.publish_rejection).clone() {
            return Err(BrokerError::Rejected(reason));
        }

        let log = self.topic(&message.topic);
        let index = log.next_partition.fetch_add(1, Ordering::SeqCst) % log.partitions.len();
        let partition = &log.partitions[index];

        let offset = {
            let mut records = lock(&partition.records);
            records.push(StoredRecord {
                value: message.payload.clone(),
                timestamp: Utc::now(),
            });
            i64::try_from(records.len()).unwrap_or(i64::MAX) - 1
        };
        partition.high_watermark.send_replace(offset + 1);

        Ok(DeliveryReceipt {
            partition: i32::try_from(index).unwrap_or(i32::MAX),
            offset,
        })
    }

    fn group(&self, group_id: &str) -> Arc<GroupState> {
        let mut groups = lock(&self.groups);
        Arc::clone(groups.entry(group_id.to_string()).or_insert_with(|| {
            let (generation, _) = watch::channel(0);
            Arc::new(GroupState {
                members: Mutex::new(GroupMembers::default()),
                generation,
            })
        }))
    }

    /// Register `member` for `topics`, rebalancing if membership changed.
    fn join_group(
        &self,
        group: &GroupState,
        member: &str,
        topics: &[String],
    ) -> (u64, Vec<TopicPartition>) {
        // Make sure every subscribed topic exists before taking the group lock.
        for topic in topics {
            self.topic(topic);
        }

        let mut members = lock(&group.members);
        let changed = members.subscriptions.get(member).map(Vec::as_slice) != Some(topics);
        if changed {
            members
                .subscriptions
                .insert(member.to_string(), topics.to_vec());
            self.rebalance(&mut members);
            group.generation.send_replace(members.generation);
        }

        let assignment = members.assignments.get(member).cloned().unwrap_or_default();
        (members.generation, assignment)
    }

    fn leave_group(&self, group: &GroupState, member: &str) {
        let mut members = lock(&group.members);
        if members.subscriptions.remove(member).is_some() {
            self.rebalance(&mut members);
            group.generation.send_replace(members.generation);
        }
    }

    fn rebalance(&self, members: &mut GroupMembers) {
        members.generation += 1;
        members.assignments.clear();

        let mut topics: Vec<&String> = members.subscriptions.values().flatten().collect();
        topics.sort();
        topics.dedup();

        let table = lock(&self.topics);
        let mut assignments: HashMap<String, Vec<TopicPartition>> = HashMap::new();
        for topic in topics {
            let eligible: Vec<&String> = members
                .subscriptions
                .iter()
                .filter(|(_, subscribed)| subscribed.contains(topic))
                .map(|(member, _)| member)
                .collect();
            let partitions = table.get(topic).map_or(0, |log| log.partitions.len());
            for index in 0..partitions {
                let owner = eligible[index % eligible.len()];
                assignments.entry(owner.clone()).or_default().push(TopicPartition::new(
                    topic.clone(),
                    i32::try_from(index).unwrap_or(i32::MAX),
                ));
            }
        }
        members.assignments = assignments;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Connector handing out connections to an [`InMemoryBroker`].
pub struct InMemoryConnector {
    state: Arc<BrokerState>,
}

#[async_trait]
impl BrokerConnector for InMemoryConnector {
    async fn connect(
        &self,
        seeds: &[String],
        version: ProtocolVersion,
    ) -> BrokerResult<Arc<dyn BrokerConnection>> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable(seeds.join(",")));
        }

        self.state.connections_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            seeds: seeds.to_vec(),
            version,
            closed: CancellationToken::new(),
        }))
    }
}

pub struct InMemoryConnection {
    state: Arc<BrokerState>,
    seeds: Vec<String>,
    version: ProtocolVersion,
    closed: CancellationToken,
}

impl InMemoryConnection {
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    async fn refresh_metadata(&self) -> BrokerResult<()> {
        self.ensure_open()?;
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable(self.seeds.join(",")));
        }
        Ok(())
    }

    fn brokers(&self) -> Vec<BrokerInfo> {
        if !self.state.advertise_brokers.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.seeds
            .iter()
            .zip(0..)
            .map(|(address, id)| BrokerInfo {
                id,
                address: address.clone(),
            })
            .collect()
    }

    async fn publisher(&self) -> BrokerResult<Box<dyn Publisher>> {
        self.ensure_open()?;
        Ok(Box::new(InMemoryPublisher {
            state: Arc::clone(&self.state),
            closed: self.closed.clone(),
        }))
    }

    async fn consumer_group(&self, group_id: &str) -> BrokerResult<Box<dyn ConsumerGroup>> {
        self.ensure_open()?;
        let member = self.state.next_member.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConsumerGroup {
            state: Arc::clone(&self.state),
            group: self.state.group(group_id),
            member_id: format!("member-{member}"),
            closed: self.closed.clone(),
        }))
    }
}

struct InMemoryPublisher {
    state: Arc<BrokerState>,
    closed: CancellationToken,
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn send(&mut self, message: &ProducerMessage) -> BrokerResult<DeliveryReceipt> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        self.state.append(message)
    }

    async fn close(self: Box<Self>) {}
}

struct InMemoryConsumerGroup {
    state: Arc<BrokerState>,
    group: Arc<GroupState>,
    member_id: String,
    closed: CancellationToken,
}

#[async_trait]
impl ConsumerGroup for InMemoryConsumerGroup {
    async fn join(&mut self, topics: &[String]) -> BrokerResult<Box<dyn GroupSession>> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        if let Some(err) = lock(&self.state.join_failures).pop_front() {
            return Err(err);
        }

        let (generation, assignment) = self.state.join_group(&self.group, &self.member_id, topics);
        let ended = self.closed.child_token();

        let mut claims: Vec<Box<dyn PartitionClaim>> = Vec::with_capacity(assignment.len());
        for tp in &assignment {
            let Some(log) = self.state.partition(tp) else {
                return Err(BrokerError::Protocol(format!("unknown partition {tp}")));
            };
            let position = lock(&self.group.members)
                .committed
                .get(tp)
                .copied()
                .unwrap_or(0);
            claims.push(Box::new(InMemoryClaim {
                tp: tp.clone(),
                high_watermark: log.high_watermark.subscribe(),
                log,
                position,
                generation,
                generations: self.group.generation.subscribe(),
                ended: ended.clone(),
            }));
        }

        Ok(Box::new(InMemorySession {
            group: Arc::clone(&self.group),
            generation,
            assignment,
            claims: Mutex::new(claims),
            ended,
        }))
    }

    async fn leave(self: Box<Self>) {
        self.state.leave_group(&self.group, &self.member_id);
    }
}

struct InMemorySession {
    group: Arc<GroupState>,
    generation: u64,
    assignment: Vec<TopicPartition>,
    claims: Mutex<Vec<Box<dyn PartitionClaim>>>,
    ended: CancellationToken,
}

#[async_trait]
impl GroupSession for InMemorySession {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.clone()
    }

    fn take_claims(&mut self) -> Vec<Box<dyn PartitionClaim>> {
        let claims = self
            .claims
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(claims)
    }

    async fn mark_message(&self, message: &ConsumedMessage) -> BrokerResult<()> {
        let mut members = lock(&self.group.members);
        if members.generation != self.generation {
            return Err(BrokerError::IllegalGeneration(self.generation));
        }
        members.committed.insert(
            TopicPartition::new(message.topic.clone(), message.partition),
            message.offset + 1,
        );
        Ok(())
    }

    async fn rebalanced(&self) {
        let mut generations = self.group.generation.subscribe();
        loop {
            if *generations.borrow_and_update() != self.generation {
                return;
            }
            tokio::select! {
                () = self.ended.cancelled() => return,
                changed = generations.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn end(self: Box<Self>) {
        self.ended.cancel();
    }
}

struct InMemoryClaim {
    tp: TopicPartition,
    log: Arc<PartitionLog>,
    high_watermark: watch::Receiver<i64>,
    position: i64,
    generation: u64,
    generations: watch::Receiver<u64>,
    ended: CancellationToken,
}

impl InMemoryClaim {
    fn is_stale(&mut self) -> bool {
        self.ended.is_cancelled() || *self.generations.borrow_and_update() != self.generation
    }

    fn record_at(&self, offset: i64) -> Option<StoredRecord> {
        let index = usize::try_from(offset).ok()?;
        lock(&self.log.records).get(index).cloned()
    }
}

#[async_trait]
impl PartitionClaim for InMemoryClaim {
    fn topic(&self) -> &str {
        &self.tp.topic
    }

    fn partition(&self) -> i32 {
        self.tp.partition
    }

    async fn next_message(&mut self) -> Option<ConsumedMessage> {
        loop {
            if self.is_stale() {
                return None;
            }

            // Mark the watermark seen before reading so a concurrent append
            // always wakes the wait below.
            drop(self.high_watermark.borrow_and_update());
            if let Some(record) = self.record_at(self.position) {
                let offset = self.position;
                self.position += 1;
                return Some(ConsumedMessage {
                    topic: self.tp.topic.clone(),
                    partition: self.tp.partition,
                    offset,
                    value: record.value,
                    timestamp: record.timestamp,
                });
            }

            tokio::select! {
                () = self.ended.cancelled() => return None,
                changed = self.generations.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = self.high_watermark.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
