//! Datastore CLI entry point.

use clap::Parser;

use datastore::cli::{self, Cli, Commands};
use datastore::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => cli::handle_error(&err, cli.json),
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Health => cli::commands::health::execute(&config, cli.json).await,
        Commands::Produce(args) => cli::commands::produce::execute(args, &config, cli.json).await,
        Commands::Consume(args) => cli::commands::consume::execute(args, &config, cli.json).await,
        Commands::Config(command) => cli::commands::config::execute(&command, &config, cli.json),
    };

    if let Err(err) = result {
        cli::handle_error(&err, cli.json);
    }
}
