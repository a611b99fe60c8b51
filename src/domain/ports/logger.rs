use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Log level enumeration for structured logging
///
/// Levels are ordered from most verbose (Trace) to most severe (Error).
///
/// # Examples
///
/// ```
/// use datastore::domain::ports::Level;
///
/// assert!(Level::Error > Level::Info);
/// assert!(Level::Trace < Level::Debug);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Returns the string representation of the log level
    ///
    /// ```
    /// use datastore::domain::ports::Level;
    ///
    /// assert_eq!(Level::Info.as_str(), "INFO");
    /// ```
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Diagnostic narration port used by the store adapters and messaging services.
///
/// Implementations must never fail in a way the caller can observe: logging
/// output is informational and is never used for control flow. The messaging
/// services hold an `Arc<dyn Logger>` so a test can swap in a capturing
/// logger, and a [`NullLogger`](crate::infrastructure::logging::NullLogger)
/// can be injected where no output is wanted.
///
/// # Structured Logging
///
/// `log` accepts fields as a `HashMap<String, Value>`. Common field names used
/// in this crate:
/// - `topic`, `partition`, `offset`: message coordinates
/// - `group_id`, `generation`: consumer group session
/// - `operation`: the port operation being narrated
/// - `error`: error details for warn/error entries
///
/// # Examples
///
/// ```
/// use datastore::domain::ports::{Logger, Level};
/// use std::collections::HashMap;
/// use serde_json::json;
///
/// async fn narrate(logger: &dyn Logger) {
///     let mut fields = HashMap::new();
///     fields.insert("topic".to_string(), json!("orders"));
///     fields.insert("offset".to_string(), json!(42));
///     logger.log(Level::Debug, "message committed", fields).await;
///
///     logger.info("consumer joined group").await;
/// }
/// ```
#[async_trait]
pub trait Logger: Send + Sync {
    /// Log a message with a specific level and structured fields
    async fn log(&self, level: Level, message: &str, fields: HashMap<String, Value>);

    async fn trace(&self, message: &str) {
        self.log(Level::Trace, message, HashMap::new()).await;
    }

    async fn debug(&self, message: &str) {
        self.log(Level::Debug, message, HashMap::new()).await;
    }

    async fn info(&self, message: &str) {
        self.log(Level::Info, message, HashMap::new()).await;
    }

    async fn warn(&self, message: &str) {
        self.log(Level::Warn, message, HashMap::new()).await;
    }

    async fn error(&self, message: &str) {
        self.log(Level::Error, message, HashMap::new()).await;
    }
}

/// Build a field map from `(name, value)` pairs.
pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> HashMap<String, Value> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
