//! Domain errors shared by every store capability.

use thiserror::Error;

use crate::domain::ports::BrokerError;

/// Errors surfaced to callers of the cache, document store, and message queue ports.
///
/// Every variant names the operation that failed so a caller can diagnose the
/// failure without inspecting backend internals.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing or empty connection parameters, detected before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No broker or server could be reached.
    #[error("{operation}: unable to reach backend: {source}")]
    Connectivity {
        operation: &'static str,
        #[source]
        source: BrokerError,
    },

    /// Argument rejected at operation entry; no I/O was attempted.
    #[error("{operation}: invalid argument: {reason}")]
    InvalidArgument {
        operation: &'static str,
        reason: String,
    },

    /// A publish was attempted and the broker rejected it or never acknowledged it.
    #[error("{operation}: delivery failed: {source}")]
    Delivery {
        operation: &'static str,
        #[source]
        source: BrokerError,
    },

    /// Consumer group join or consumption failure.
    #[error("{operation}: consumer session failed: {source}")]
    Session {
        operation: &'static str,
        #[source]
        source: BrokerError,
    },

    /// The caller-supplied message handler failed; the message was not committed.
    #[error("handler failed for {topic}[{partition}]@{offset}: {reason}")]
    Handler {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("{operation}: not found: {what}")]
    NotFound {
        operation: &'static str,
        what: String,
    },

    /// Failure reported by a cache or database driver.
    #[error("{operation}: backend error: {reason}")]
    Backend {
        operation: &'static str,
        reason: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn invalid_argument(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation,
            reason: reason.into(),
        }
    }

    pub fn backend(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            reason: reason.to_string(),
        }
    }

    pub fn not_found(operation: &'static str, what: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            what: what.into(),
        }
    }

    /// True for errors raised before any network call was made.
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidArgument { .. })
    }
}

/// Reject an empty or whitespace-only string argument.
pub(crate) fn require_non_empty(
    operation: &'static str,
    name: &str,
    value: &str,
) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::invalid_argument(
            operation,
            format!("{name} cannot be empty"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_operation() {
        let err = StoreError::invalid_argument("produce_message", "topic cannot be empty");
        assert_eq!(
            err.to_string(),
            "produce_message: invalid argument: topic cannot be empty"
        );

        let err = StoreError::Delivery {
            operation: "produce_message",
            source: BrokerError::Rejected("message too large".to_string()),
        };
        assert!(err.to_string().contains("produce_message"));
        assert!(err.to_string().contains("message too large"));
    }

    #[test]
    fn test_is_local() {
        assert!(StoreError::Configuration("no brokers".into()).is_local());
        assert!(StoreError::invalid_argument("get_data", "key cannot be empty").is_local());
        assert!(!StoreError::backend("get_data", "timeout").is_local());
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("op", "topic", "orders").is_ok());
        assert!(require_non_empty("op", "topic", "").is_err());
        assert!(require_non_empty("op", "topic", "   ").is_err());
    }
}
