//! Geowatch CLI - Command-line interface
//!
//! This binary provides a command-line interface to the geowatch library:
//! geofence checks, track replays through a full tracking session, and a
//! WebSocket bridge for out-of-process map renderers.

mod commands;
mod error;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use geowatch::logging::{init_logging, LoggingGuard};
use tracing::info;

use commands::check::CheckArgs;
use commands::config::ConfigCommands;
use commands::replay::ReplayCommandArgs;
use commands::serve::ServeArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "geowatch")]
#[command(version, about = "Live location tracking with geofences and map sync", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.geowatch/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Mirror log output to stdout
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check which geofences contain a coordinate
    Check(CheckArgs),

    /// Replay a recorded track through a tracking session
    Replay(ReplayCommandArgs),

    /// Replay a track and serve the map protocol over WebSocket
    Serve(ServeArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli {
        config,
        verbose,
        command,
    } = cli;

    let _guard = match command {
        Commands::Config { .. } => None,
        _ => Some(start_logging(config.as_deref(), verbose)?),
    };
    info!(version = env!("CARGO_PKG_VERSION"), "geowatch starting");

    match command {
        Commands::Check(args) => commands::check::run(args, config).await,
        Commands::Replay(args) => commands::replay::run(args, config).await,
        Commands::Serve(args) => commands::serve::run(args, config).await,
        Commands::Config { command } => commands::config::run(command, config),
    }
}

fn start_logging(config: Option<&Path>, verbose: bool) -> Result<LoggingGuard, CliError> {
    let settings = commands::common::load_config(config)?.logging;
    init_logging(&settings.directory, &settings.file, verbose)
        .map_err(|e| CliError::LoggingInit(e.to_string()))
}
