//! `datastore produce`

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::cli::output::{output, CommandOutput};
use crate::cli::types::ProduceArgs;
use crate::domain::models::Config;
use crate::domain::ports::MessageQueue;
use crate::infrastructure::logging::TracingLogger;
use crate::infrastructure::setup::build_message_queue;

#[derive(Debug, Serialize)]
pub struct ProduceOutput {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl CommandOutput for ProduceOutput {
    fn to_human(&self) -> String {
        format!(
            "Message stored in topic({}) partition({}) offset({})",
            self.topic, self.partition, self.offset
        )
    }
}

pub async fn execute(args: ProduceArgs, config: &Config, json_mode: bool) -> Result<()> {
    let queue = build_message_queue(&config.messaging, Arc::new(TracingLogger))
        .context("Failed to build message queue")?;

    let receipt = queue
        .produce_message(&args.topic, &args.message)
        .await
        .with_context(|| format!("Failed to publish to {}", args.topic))?;
    queue.shutdown().await;

    output(
        &ProduceOutput {
            topic: args.topic,
            partition: receipt.partition,
            offset: receipt.offset,
        },
        json_mode,
    );
    Ok(())
}
