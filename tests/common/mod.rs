//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use datastore::adapters::memory::InMemoryBroker;
use datastore::domain::models::ProtocolVersion;
use datastore::domain::ports::Logger;
use datastore::infrastructure::logging::NullLogger;
use datastore::services::{BrokerMessageQueue, ConsumerStatus};
use tokio::sync::watch;

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue over `broker` with a silent logger and a short rejoin backoff.
pub fn queue(broker: &InMemoryBroker) -> BrokerMessageQueue {
    queue_with_logger(broker, Arc::new(NullLogger))
}

pub fn queue_with_logger(broker: &InMemoryBroker, logger: Arc<dyn Logger>) -> BrokerMessageQueue {
    BrokerMessageQueue::new(
        Arc::new(broker.connector()),
        vec!["broker1:9092".to_string(), "broker2:9092".to_string()],
        ProtocolVersion::V2_0_0,
        logger,
    )
    .expect("valid seeds")
    .with_rejoin_backoff(Duration::from_millis(10))
}

/// Wait until the coordinator status satisfies `predicate`.
pub async fn wait_for_status(
    status: &mut watch::Receiver<ConsumerStatus>,
    predicate: impl FnMut(&ConsumerStatus) -> bool,
) {
    tokio::time::timeout(TEST_TIMEOUT, status.wait_for(predicate))
        .await
        .expect("status reached in time")
        .expect("status channel open");
}

/// Setup test logging
///
/// Initializes a tracing subscriber writing through the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
