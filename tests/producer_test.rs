mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use datastore::adapters::memory::InMemoryBroker;
use datastore::domain::ports::{BrokerError, MessageQueue};
use datastore::domain::StoreError;
use datastore::infrastructure::logging::RecordingLogger;
use futures::future::join_all;

#[tokio::test]
async fn test_sequential_publishes_get_increasing_offsets() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);

    let first = queue.produce_message("orders", "first").await.unwrap();
    let second = queue.produce_message("orders", "second").await.unwrap();

    assert_eq!((first.partition, first.offset), (0, 0));
    assert_eq!((second.partition, second.offset), (0, 1));
    assert_eq!(broker.high_watermark("orders", 0), Some(2));
}

#[tokio::test]
async fn test_publishes_spread_over_partitions() {
    let broker = InMemoryBroker::new(1);
    broker.create_topic("events", 3);
    let queue = common::queue(&broker);

    let mut receipts = Vec::new();
    for i in 0..6 {
        receipts.push(queue.produce_message("events", &format!("e{i}")).await.unwrap());
    }

    let coordinates: Vec<(i32, i64)> = receipts.iter().map(|r| (r.partition, r.offset)).collect();
    assert_eq!(
        coordinates,
        vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]
    );
}

#[tokio::test]
async fn test_empty_topic_rejected_before_connecting() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);

    let err = queue.produce_message("", "payload").await.unwrap_err();

    assert!(matches!(
        err,
        StoreError::InvalidArgument {
            operation: "produce_message",
            ..
        }
    ));
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn test_empty_payload_is_published() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);

    let receipt = queue.produce_message("orders", "").await.unwrap();
    assert_eq!(receipt.offset, 0);
}

#[tokio::test]
async fn test_rejected_publish_is_delivery_error() {
    let broker = InMemoryBroker::new(1);
    broker.set_publish_rejection(Some("message too large"));
    let queue = common::queue(&broker);

    let err = queue.produce_message("orders", "big").await.unwrap_err();
    match err {
        StoreError::Delivery { operation, source } => {
            assert_eq!(operation, "produce_message");
            assert_eq!(source, BrokerError::Rejected("message too large".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // No retry happened and nothing was stored.
    assert_eq!(broker.high_watermark("orders", 0), None);

    broker.set_publish_rejection(None);
    let receipt = queue.produce_message("orders", "small").await.unwrap();
    assert_eq!(receipt.offset, 0);
    assert_eq!(broker.connections_created(), 1);
}

#[tokio::test]
async fn test_concurrent_publishes_get_distinct_offsets() {
    let broker = InMemoryBroker::new(1);
    let queue = Arc::new(common::queue(&broker));

    let receipts = join_all((0..20).map(|i| {
        let queue = Arc::clone(&queue);
        async move { queue.produce_message("orders", &format!("m{i}")).await }
    }))
    .await;

    let offsets: BTreeSet<i64> = receipts
        .into_iter()
        .map(|receipt| receipt.unwrap().offset)
        .collect();
    assert_eq!(offsets, (0..20).collect());
}

#[tokio::test]
async fn test_successful_publish_is_narrated() {
    let broker = InMemoryBroker::new(1);
    let logger = Arc::new(RecordingLogger::new());
    let queue = common::queue_with_logger(&broker, logger.clone());

    queue.produce_message("orders", "hello").await.unwrap();

    let sent = logger.matching("message sent");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].fields.get("topic"), Some(&serde_json::json!("orders")));
    assert_eq!(sent[0].fields.get("offset"), Some(&serde_json::json!(0)));
}
