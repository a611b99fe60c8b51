use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

use crate::domain::ports::BrokerError;

/// Classify an rdkafka failure into the broker error kinds the services act on.
pub fn map_kafka_error(err: &KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::RebalanceInProgress) => BrokerError::RebalanceInProgress,
        Some(RDKafkaErrorCode::UnknownMemberId) => BrokerError::UnknownMember(err.to_string()),
        Some(RDKafkaErrorCode::IllegalGeneration) => BrokerError::IllegalGeneration(0),
        Some(RDKafkaErrorCode::NotCoordinator) => BrokerError::NotCoordinator,
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::OperationTimedOut,
        ) => BrokerError::Unreachable(err.to_string()),
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed
            | RDKafkaErrorCode::InvalidGroupId
            | RDKafkaErrorCode::MessageTimedOut,
        ) => BrokerError::Rejected(err.to_string()),
        _ => BrokerError::Protocol(err.to_string()),
    }
}

/// Consume errors that end the membership. Transport hiccups and
/// rebalance-family errors are retried by librdkafka itself.
pub(super) const fn is_fatal_consume_error(err: &BrokerError) -> bool {
    matches!(err, BrokerError::Rejected(_))
}
