mod cli;
mod modules;

use std::process::ExitCode;

use clap::Parser;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use trellis_core::PluginManager;

use crate::cli::CliArgs;

const LOG_ENV: &str = "TRELLIS_LOG";

/// Sends `tracing` output and `log` records from the core to stderr,
/// filtered by `TRELLIS_LOG` (default `info`).
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }
    if let Err(e) = LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    init_logging();

    let config = match args.manager_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "Manager configuration");

    let manager = PluginManager::from_config(config, modules::module_factory());
    if let Err(e) = manager.init().await {
        eprintln!("Error: failed to start the plugin framework: {}", e);
        return ExitCode::FAILURE;
    }

    let outcome = match args.command {
        Some(command) => cli::run(&manager, command).await,
        None => cli::run(&manager, cli::Commands::List).await,
    };

    if let Err(e) = manager.shutdown().await {
        tracing::warn!("Shutdown did not complete cleanly: {}", e);
    }
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
