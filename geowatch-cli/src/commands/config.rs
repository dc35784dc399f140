//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show`, and `config init`.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use geowatch::config::{config_file_path, ConfigFile};

use super::common::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration
    Show,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = config_path.unwrap_or_else(config_file_path);
    match command {
        ConfigCommands::Path => run_path(&path),
        ConfigCommands::Show => run_show(&path),
        ConfigCommands::Init { force } => run_init(&path, force),
    }
}

fn run_path(path: &Path) -> Result<(), CliError> {
    println!("{}", path.display());
    Ok(())
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = load_config(Some(path))?;
    let exists = if path.exists() { "" } else { " (not found, defaults)" };
    println!("# {}{}", path.display(), exists);
    println!();

    let location = &config.location;
    println!("[location]");
    println!("platform = {}", location.platform);
    println!("enable_high_accuracy = {}", location.enable_high_accuracy);
    println!("timeout_ms = {}", location.timeout_ms);
    println!("max_cache_age_ms = {}", location.max_cache_age_ms);
    println!("min_distance_filter_m = {}", location.min_distance_filter_m);
    println!("provider_timeout_ms = {}", location.provider_timeout_ms);
    println!();

    let map = &config.map;
    println!("[map]");
    println!("handshake_timeout_ms = {}", map.handshake_timeout_ms);
    println!("default_zoom = {}", map.default_zoom);
    println!("follow_self = {}", map.follow_self);
    println!("listen = {}", map.listen);
    println!();

    let geofence = &config.geofence;
    println!("[geofence]");
    println!("endpoint = {}", or_unset(geofence.endpoint.as_deref()));
    println!("user_id = {}", or_unset(geofence.user_id.as_deref()));
    println!(
        "file = {}",
        geofence
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("request_timeout_secs = {}", geofence.request_timeout_secs);
    println!();

    println!("[logging]");
    println!("directory = {}", config.logging.directory.display());
    println!("file = {}", config.logging.file);
    Ok(())
}

fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        println!("Configuration file already exists: {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    ConfigFile::default().save_to(path)?;
    println!("Configuration file: {}", path.display());
    println!();
    println!("Edit this file to customize geowatch settings.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}
