//! Kafka backend for the broker seam, built on rdkafka.
//!
//! A connection owns one `FutureProducer` used for publishing and metadata.
//! Each consumer group membership owns a `StreamConsumer` plus a driver task
//! that polls it, tracks the partition assignment, and routes every fetched
//! message to the claim owning its partition. A partition with no live claim
//! is paused and rewound until the next session claims it. An unrecoverable
//! consume error is recorded on the membership and ends every session.

mod consumer;
mod error;

pub use error::map_kafka_error;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::models::{BrokerInfo, DeliveryReceipt, ProducerMessage, ProtocolVersion};
use crate::domain::ports::{
    BrokerConnection, BrokerConnector, BrokerError, BrokerResult, ConsumerGroup, Publisher,
};

use consumer::KafkaConsumerGroup;

/// Default deadline for metadata requests, deliveries, and commits.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector creating rdkafka clients for a seed broker list.
pub struct KafkaConnector {
    client_id: String,
    timeout: Duration,
}

impl KafkaConnector {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(
        &self,
        seeds: &[String],
        version: ProtocolVersion,
    ) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", seeds.join(","))
            .set("client.id", &self.client_id)
            .set("broker.version.fallback", version.to_string())
            .set("message.timeout.ms", self.timeout.as_millis().to_string());

        let producer: FutureProducer = config
            .create()
            .map_err(|err| BrokerError::Unreachable(err.to_string()))?;

        // Fail here rather than hand out a connection nobody can use.
        let brokers = fetch_brokers(producer.clone(), self.timeout).await?;

        Ok(Arc::new(KafkaConnection {
            config,
            producer,
            brokers: Mutex::new(brokers),
            closed: AtomicBool::new(false),
            timeout: self.timeout,
        }))
    }
}

async fn fetch_brokers(producer: FutureProducer, timeout: Duration) -> BrokerResult<Vec<BrokerInfo>> {
    tokio::task::spawn_blocking(move || {
        let metadata = producer
            .client()
            .fetch_metadata(None, timeout)
            .map_err(|err| map_kafka_error(&err))?;
        Ok(metadata
            .brokers()
            .iter()
            .map(|broker| BrokerInfo {
                id: broker.id(),
                address: format!("{}:{}", broker.host(), broker.port()),
            })
            .collect())
    })
    .await
    .map_err(|err| BrokerError::Protocol(err.to_string()))?
}

pub struct KafkaConnection {
    config: ClientConfig,
    producer: FutureProducer,
    brokers: Mutex<Vec<BrokerInfo>>,
    closed: AtomicBool,
    timeout: Duration,
}

impl KafkaConnection {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for KafkaConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let producer = self.producer.clone();
        let timeout = self.timeout;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout)).await;
        if let Ok(Err(err)) = flushed {
            tracing::warn!(error = %err, "flush on close failed");
        }
    }

    async fn refresh_metadata(&self) -> BrokerResult<()> {
        self.ensure_open()?;
        let brokers = fetch_brokers(self.producer.clone(), self.timeout).await?;
        *self
            .brokers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = brokers;
        Ok(())
    }

    fn brokers(&self) -> Vec<BrokerInfo> {
        self.brokers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn publisher(&self) -> BrokerResult<Box<dyn Publisher>> {
        self.ensure_open()?;
        Ok(Box::new(KafkaPublisher {
            producer: self.producer.clone(),
            timeout: self.timeout,
        }))
    }

    async fn consumer_group(&self, group_id: &str) -> BrokerResult<Box<dyn ConsumerGroup>> {
        self.ensure_open()?;
        let mut config = self.config.clone();
        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");
        Ok(Box::new(KafkaConsumerGroup::new(config, self.timeout)))
    }
}

struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn send(&mut self, message: &ProducerMessage) -> BrokerResult<DeliveryReceipt> {
        let record: FutureRecord<'_, (), [u8]> =
            FutureRecord::to(&message.topic).payload(message.payload.as_slice());

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => Ok(DeliveryReceipt { partition, offset }),
            Err((err, _)) => Err(map_kafka_error(&err)),
        }
    }

    async fn close(self: Box<Self>) {}
}
