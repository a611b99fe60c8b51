//! `datastore health`

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{BrokerInfo, Config};
use crate::infrastructure::logging::TracingLogger;
use crate::infrastructure::setup::build_message_queue;

#[derive(Debug, Serialize)]
pub struct HealthOutput {
    pub healthy: bool,
    pub brokers: Vec<BrokerInfo>,
}

impl CommandOutput for HealthOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Message queue healthy: {} broker(s)\n", self.brokers.len())];
        lines.push(format!("{:<6} {:<40}", "ID", "ADDRESS"));
        lines.push("-".repeat(47));
        for broker in &self.brokers {
            lines.push(format!("{:<6} {:<40}", broker.id, broker.address));
        }
        lines.join("\n")
    }
}

pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let queue = build_message_queue(&config.messaging, Arc::new(TracingLogger))
        .context("Failed to build message queue")?;

    let brokers = queue
        .brokers()
        .await
        .context("Message queue health check failed")?;
    queue.shutdown().await;

    output(
        &HealthOutput {
            healthy: true,
            brokers,
        },
        json_mode,
    );
    Ok(())
}
