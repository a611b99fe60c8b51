//! `datastore consume`

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::types::ConsumeArgs;
use crate::domain::errors::StoreResult;
use crate::domain::models::{Config, ConsumedMessage};
use crate::domain::ports::MessageQueue;
use crate::infrastructure::logging::TracingLogger;
use crate::infrastructure::setup::build_message_queue;

/// Longest payload shown in human output.
const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Serialize)]
pub struct MessageOutput {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: String,
    pub value: String,
}

impl From<&ConsumedMessage> for MessageOutput {
    fn from(message: &ConsumedMessage) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp.to_rfc3339(),
            value: message.value_lossy(),
        }
    }
}

impl CommandOutput for MessageOutput {
    fn to_human(&self) -> String {
        format!(
            "{}[{}]@{} {}",
            self.topic,
            self.partition,
            self.offset,
            truncate(&self.value, PREVIEW_CHARS)
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ConsumeSummary {
    pub topic: String,
    pub group: String,
    pub consumed: usize,
}

impl CommandOutput for ConsumeSummary {
    fn to_human(&self) -> String {
        format!(
            "Consumed {} message(s) from {} as group {}",
            self.consumed, self.topic, self.group
        )
    }
}

pub async fn execute(args: ConsumeArgs, config: &Config, json_mode: bool) -> Result<()> {
    let queue = build_message_queue(&config.messaging, Arc::new(TracingLogger))
        .context("Failed to build message queue")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let consumed = Arc::new(AtomicUsize::new(0));
    let handler = {
        let consumed = Arc::clone(&consumed);
        let cancel = cancel.clone();
        let max_messages = args.max_messages;
        move |message: ConsumedMessage| {
            let consumed = Arc::clone(&consumed);
            let cancel = cancel.clone();
            async move {
                output(&MessageOutput::from(&message), json_mode);
                let seen = consumed.fetch_add(1, Ordering::SeqCst) + 1;
                if max_messages.is_some_and(|max| seen >= max) {
                    cancel.cancel();
                }
                StoreResult::<()>::Ok(())
            }
        }
    };

    let result = queue
        .consume_messages(&args.topic, &args.group, &handler, cancel)
        .await;
    queue.shutdown().await;
    result.with_context(|| format!("Consumer for {} stopped with an error", args.topic))?;

    if !json_mode {
        output(
            &ConsumeSummary {
                topic: args.topic,
                group: args.group,
                consumed: consumed.load(Ordering::SeqCst),
            },
            json_mode,
        );
    }
    Ok(())
}
