//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, plus the
//! implementations of the `Logger` port handed to the services.

pub mod logger;
pub mod port;

pub use logger::LoggerImpl;
pub use port::{LogRecord, NullLogger, RecordingLogger, TracingLogger};
