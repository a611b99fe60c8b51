//! Infrastructure layer module
//!
//! - Configuration management
//! - Logging infrastructure
//! - Backend wiring from configuration

pub mod config;
pub mod logging;
pub mod setup;
