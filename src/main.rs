//! vpn-tuner CLI entry point.

use clap::Parser;

use vpn_tuner::cli::{commands, handle_error, Cli, Commands};
use vpn_tuner::infrastructure::config::ConfigLoader;
use vpn_tuner::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Optimize(args) => commands::optimize::execute(args, &config, cli.json).await,
        Commands::Measure => commands::measure::execute(&config, cli.json).await,
        Commands::Experiments(command) => {
            commands::experiments::execute(command, &config, cli.json).await
        }
        Commands::Config(command) => commands::config::execute(command, &config, cli.json),
    };

    if let Err(err) = result {
        // Flush buffered file output before exiting.
        drop(logger);
        handle_error(err, cli.json);
    }
}
