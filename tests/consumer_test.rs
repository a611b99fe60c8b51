mod common;

use std::sync::{Arc, Mutex};

use datastore::adapters::memory::InMemoryBroker;
use datastore::domain::models::ConsumedMessage;
use datastore::domain::ports::{BrokerError, MessageQueue};
use datastore::domain::{StoreError, StoreResult};
use datastore::infrastructure::logging::RecordingLogger;
use datastore::services::ConsumerPhase;
use tokio_util::sync::CancellationToken;

/// Handler that records payloads and cancels after `stop_after` messages.
fn collecting(
    seen: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
    stop_after: usize,
) -> impl Fn(ConsumedMessage) -> futures::future::Ready<StoreResult<()>> + Send + Sync {
    move |message: ConsumedMessage| {
        let mut seen = seen.lock().unwrap();
        seen.push(message.value_lossy());
        if seen.len() >= stop_after {
            cancel.cancel();
        }
        futures::future::ready(Ok(()))
    }
}

#[tokio::test]
async fn test_cancel_before_any_message_returns_cleanly() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    let coordinator = queue.coordinator();
    let mut status = coordinator.subscribe();
    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = collecting(Arc::clone(&seen), cancel.clone(), usize::MAX);

    let run = coordinator.run("orders", "billing", &handler, cancel.clone());
    let stop = async {
        common::wait_for_status(&mut status, |s| s.phase == ConsumerPhase::Claiming).await;
        cancel.cancel();
    };

    let (result, ()) = tokio::time::timeout(common::TEST_TIMEOUT, async { tokio::join!(run, stop) })
        .await
        .expect("consumer stops promptly");

    assert!(result.is_ok());
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(broker.committed_offset("billing", "orders", 0), None);
    assert_eq!(coordinator.status().phase, ConsumerPhase::Terminated);
    assert_eq!(coordinator.status().sessions_ready, 1);
}

#[tokio::test]
async fn test_already_cancelled_token_never_connects() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let handler = collecting(Arc::new(Mutex::new(Vec::new())), cancel.clone(), 1);

    queue
        .consume_messages("orders", "billing", &handler, cancel)
        .await
        .unwrap();

    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn test_commits_follow_handled_messages() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    for payload in ["a", "b", "c"] {
        queue.produce_message("orders", payload).await.unwrap();
    }

    let coordinator = queue.coordinator();
    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = collecting(Arc::clone(&seen), cancel.clone(), 3);

    tokio::time::timeout(
        common::TEST_TIMEOUT,
        coordinator.run("orders", "billing", &handler, cancel),
    )
    .await
    .expect("consumer finishes")
    .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(broker.committed_offset("billing", "orders", 0), Some(3));
    assert_eq!(coordinator.status().committed, 3);
}

#[tokio::test]
async fn test_offset_is_committed_only_after_handler_returns() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    for payload in ["a", "b", "c"] {
        queue.produce_message("orders", payload).await.unwrap();
    }

    let cancel = CancellationToken::new();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let broker = broker.clone();
        let observed = Arc::clone(&observed);
        let cancel = cancel.clone();
        move |message: ConsumedMessage| {
            let committed = broker.committed_offset("billing", &message.topic, message.partition);
            let mut observed = observed.lock().unwrap();
            observed.push((message.offset, committed));
            if observed.len() >= 3 {
                cancel.cancel();
            }
            futures::future::ready(StoreResult::<()>::Ok(()))
        }
    };

    tokio::time::timeout(
        common::TEST_TIMEOUT,
        queue.consume_messages("orders", "billing", &handler, cancel),
    )
    .await
    .expect("consumer finishes")
    .unwrap();

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed, vec![(0, None), (1, Some(1)), (2, Some(2))]);
    assert!(observed
        .iter()
        .all(|(offset, committed)| *committed != Some(offset + 1)));
    assert_eq!(broker.committed_offset("billing", "orders", 0), Some(3));
}

#[tokio::test]
async fn test_restart_resumes_after_last_commit() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    for payload in ["a", "b", "c", "d"] {
        queue.produce_message("orders", payload).await.unwrap();
    }

    let first = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let handler = collecting(Arc::clone(&first), cancel.clone(), 2);
    queue
        .consume_messages("orders", "billing", &handler, cancel)
        .await
        .unwrap();
    assert_eq!(*first.lock().unwrap(), vec!["a", "b"]);

    let second = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let handler = collecting(Arc::clone(&second), cancel.clone(), 2);
    tokio::time::timeout(
        common::TEST_TIMEOUT,
        queue.consume_messages("orders", "billing", &handler, cancel),
    )
    .await
    .expect("consumer finishes")
    .unwrap();

    assert_eq!(*second.lock().unwrap(), vec!["c", "d"]);
    assert_eq!(broker.committed_offset("billing", "orders", 0), Some(4));
}

#[tokio::test]
async fn test_handler_error_stops_without_commit() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    for payload in ["good", "poison", "later"] {
        queue.produce_message("orders", payload).await.unwrap();
    }

    let handler = |message: ConsumedMessage| async move {
        if message.value_lossy() == "poison" {
            Err(StoreError::Backend {
                operation: "handle",
                reason: "cannot decode".to_string(),
            })
        } else {
            Ok(())
        }
    };

    let err = tokio::time::timeout(
        common::TEST_TIMEOUT,
        queue.consume_messages("orders", "billing", &handler, CancellationToken::new()),
    )
    .await
    .expect("consumer terminates")
    .unwrap_err();

    match err {
        StoreError::Handler {
            topic,
            partition,
            offset,
            reason,
        } => {
            assert_eq!(topic, "orders");
            assert_eq!(partition, 0);
            assert_eq!(offset, 1);
            assert!(reason.contains("cannot decode"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(broker.committed_offset("billing", "orders", 0), Some(1));

    // The failed message is redelivered to the next member.
    let seen = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let retry = collecting(Arc::clone(&seen), cancel.clone(), 1);
    queue
        .consume_messages("orders", "billing", &retry, cancel)
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["poison"]);
}

#[tokio::test]
async fn test_messages_published_while_claiming_are_delivered() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    let coordinator = queue.coordinator();
    let mut status = coordinator.subscribe();
    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = collecting(Arc::clone(&seen), cancel.clone(), 2);

    let run = coordinator.run("orders", "billing", &handler, cancel.clone());
    let publish = async {
        common::wait_for_status(&mut status, |s| s.phase == ConsumerPhase::Claiming).await;
        queue.produce_message("orders", "late-1").await.unwrap();
        queue.produce_message("orders", "late-2").await.unwrap();
    };

    let (result, ()) = tokio::time::timeout(common::TEST_TIMEOUT, async { tokio::join!(run, publish) })
        .await
        .expect("consumer finishes");

    result.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["late-1", "late-2"]);
}

#[tokio::test]
async fn test_second_member_triggers_rebalance() {
    let broker = InMemoryBroker::new(1);
    broker.create_topic("orders", 2);
    let first_queue = common::queue(&broker);
    let second_queue = common::queue(&broker);

    let first = first_queue.coordinator();
    let second = second_queue.coordinator();
    let mut first_status = first.subscribe();
    let mut second_status = second.subscribe();
    let cancel = CancellationToken::new();
    let noop = |_message: ConsumedMessage| async { StoreResult::<()>::Ok(()) };

    let first_run = first.run("orders", "billing", &noop, cancel.clone());
    let second_run = second.run("orders", "billing", &noop, cancel.clone());
    let observe = async {
        common::wait_for_status(&mut first_status, |s| s.generation == Some(2)).await;
        common::wait_for_status(&mut second_status, |s| s.generation == Some(2)).await;
        assert_eq!(broker.group_members("billing"), 2);
        assert_eq!(broker.group_generation("billing"), Some(2));
        // Whoever joined first had to rejoin for the second generation.
        let ready = first.status().sessions_ready + second.status().sessions_ready;
        assert_eq!(ready, 3);
        cancel.cancel();
    };

    let (first_result, second_result, ()) = tokio::time::timeout(common::TEST_TIMEOUT, async {
        tokio::join!(first_run, second_run, observe)
    })
    .await
    .expect("both members stop");

    first_result.unwrap();
    second_result.unwrap();
    assert_eq!(broker.group_members("billing"), 0);
}

#[tokio::test]
async fn test_rebalance_error_on_join_is_retried() {
    let broker = InMemoryBroker::new(1);
    broker.fail_next_join(BrokerError::RebalanceInProgress);
    let logger = Arc::new(RecordingLogger::new());
    let queue = common::queue_with_logger(&broker, logger.clone());
    queue.produce_message("orders", "after-rejoin").await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let handler = collecting(Arc::clone(&seen), cancel.clone(), 1);

    tokio::time::timeout(
        common::TEST_TIMEOUT,
        queue.consume_messages("orders", "billing", &handler, cancel),
    )
    .await
    .expect("consumer finishes")
    .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["after-rejoin"]);
    assert_eq!(logger.matching("rejoining").len(), 1);
}

#[tokio::test]
async fn test_fatal_join_error_is_session_error() {
    let broker = InMemoryBroker::new(1);
    broker.fail_next_join(BrokerError::Protocol("unsupported version".to_string()));
    let queue = common::queue(&broker);
    let handler = |_message: ConsumedMessage| async { StoreResult::<()>::Ok(()) };

    let err = tokio::time::timeout(
        common::TEST_TIMEOUT,
        queue.consume_messages("orders", "billing", &handler, CancellationToken::new()),
    )
    .await
    .expect("consumer terminates")
    .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Session {
            operation: "consume_messages",
            ..
        }
    ));
}

#[tokio::test]
async fn test_unreachable_broker_is_connectivity_error() {
    let broker = InMemoryBroker::new(1);
    broker.set_reachable(false);
    let queue = common::queue(&broker);
    let handler = |_message: ConsumedMessage| async { StoreResult::<()>::Ok(()) };

    let err = queue
        .consume_messages("orders", "billing", &handler, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Connectivity { .. }));
}

#[tokio::test]
async fn test_empty_topic_is_invalid_argument() {
    let broker = InMemoryBroker::new(1);
    let queue = common::queue(&broker);
    let handler = |_message: ConsumedMessage| async { StoreResult::<()>::Ok(()) };

    let err = queue
        .consume_messages("", "billing", &handler, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::InvalidArgument { .. }));
    assert_eq!(broker.connect_attempts(), 0);
}
