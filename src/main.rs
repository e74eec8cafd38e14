//! simroute CLI entry point.

use clap::Parser;

use simroute::cli::commands;
use simroute::cli::{handle_error, load_config, Cli, Commands};
use simroute::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    let logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err.into(), cli.json),
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Fingerprint(args) => commands::fingerprint::execute(args, &config, cli.json)
            .await
            .map(|()| true),
        Commands::Config(args) => commands::config::execute(args, config, cli.json).await.map(|()| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => {
            drop(logger);
            std::process::exit(2);
        }
        Err(err) => handle_error(err, cli.json),
    }
}
