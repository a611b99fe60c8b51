//! Domain layer for the datastore clients
//!
//! This module contains the capability ports, their models, and the shared
//! error taxonomy.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{StoreError, StoreResult};
