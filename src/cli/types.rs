//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "datastore")]
#[command(about = "Datastore - cache, document store, and message queue client", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to datastore.yaml plus overrides)
    #[arg(short, long, global = true, env = "DATASTORE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the message broker is reachable
    Health,

    /// Publish one message
    Produce(ProduceArgs),

    /// Consume messages as a member of a consumer group
    Consume(ConsumeArgs),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct ProduceArgs {
    /// Destination topic
    #[arg(short, long)]
    pub topic: String,

    /// Message payload
    #[arg(short, long)]
    pub message: String,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Topic to subscribe to
    #[arg(short, long)]
    pub topic: String,

    /// Consumer group id
    #[arg(short, long)]
    pub group: String,

    /// Stop after this many messages
    #[arg(short = 'n', long)]
    pub max_messages: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
}
