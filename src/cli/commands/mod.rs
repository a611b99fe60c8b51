//! CLI command implementations.

pub mod config;
pub mod consume;
pub mod health;
pub mod produce;
