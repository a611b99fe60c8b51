use std::collections::HashMap;
use std::sync::Arc;

use datastore::adapters::memory::cache::glob_matches;
use datastore::adapters::memory::InMemoryBroker;
use datastore::domain::models::ProtocolVersion;
use datastore::domain::ports::MessageQueue;
use datastore::infrastructure::logging::NullLogger;
use datastore::services::BrokerMessageQueue;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    /// Property: offsets within a partition are contiguous from zero
    ///
    /// However many messages are published and however many partitions the
    /// topic has, each partition's receipts read 0, 1, 2, ... in publish order.
    #[test]
    fn prop_partition_offsets_are_contiguous(
        messages in 1usize..40,
        partitions in 1u32..5,
    ) {
        let receipts = runtime().block_on(async {
            let broker = InMemoryBroker::new(1);
            broker.create_topic("events", partitions);
            let queue = BrokerMessageQueue::new(
                Arc::new(broker.connector()),
                vec!["broker1:9092".to_string()],
                ProtocolVersion::V2_0_0,
                Arc::new(NullLogger),
            )
            .expect("valid seeds");

            let mut receipts = Vec::with_capacity(messages);
            for i in 0..messages {
                receipts.push(queue.produce_message("events", &i.to_string()).await);
            }
            receipts
        });

        let mut next: HashMap<i32, i64> = HashMap::new();
        for receipt in receipts {
            let receipt = receipt.expect("publish succeeds");
            prop_assert!(receipt.partition >= 0);
            prop_assert!(u32::try_from(receipt.partition).unwrap() < partitions);
            let expected = next.entry(receipt.partition).or_insert(0);
            prop_assert_eq!(receipt.offset, *expected);
            *expected += 1;
        }
    }

    /// Property: a key without glob metacharacters matches itself
    #[test]
    fn prop_literal_key_matches_itself(key in "[a-z0-9:_-]{1,24}") {
        prop_assert!(glob_matches(&key, &key));
        prop_assert!(glob_matches("*", &key));
    }

    /// Property: a prefix pattern matches exactly the keys with that prefix
    #[test]
    fn prop_prefix_pattern(prefix in "[a-z]{1,6}", key in "[a-z]{0,10}") {
        let pattern = format!("{prefix}*");
        prop_assert_eq!(glob_matches(&pattern, &key), key.starts_with(&prefix));
    }
}
