//! `Logger` port implementations.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::ports::{Level, Logger};

/// Forwards port calls to `tracing`, with fields rendered as one JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

#[async_trait]
impl Logger for TracingLogger {
    async fn log(&self, level: Level, message: &str, fields: HashMap<String, Value>) {
        let rendered = if fields.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&fields).unwrap_or_default()
        };

        match level {
            Level::Trace => tracing::trace!(target: "datastore", fields = %rendered, "{message}"),
            Level::Debug => tracing::debug!(target: "datastore", fields = %rendered, "{message}"),
            Level::Info => tracing::info!(target: "datastore", fields = %rendered, "{message}"),
            Level::Warn => tracing::warn!(target: "datastore", fields = %rendered, "{message}"),
            Level::Error => tracing::error!(target: "datastore", fields = %rendered, "{message}"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

#[async_trait]
impl Logger for NullLogger {
    async fn log(&self, _level: Level, _message: &str, _fields: HashMap<String, Value>) {}
}

/// One entry captured by [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, Value>,
}

/// Keeps every entry in memory for later inspection.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Records whose message contains `needle`.
    pub fn matching(&self, needle: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.message.contains(needle))
            .collect()
    }
}

#[async_trait]
impl Logger for RecordingLogger {
    async fn log(&self, level: Level, message: &str, fields: HashMap<String, Value>) {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(LogRecord {
                level,
                message: message.to_string(),
                fields,
            });
    }
}
