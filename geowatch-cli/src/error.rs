//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use geowatch::config::ConfigFileError;
use geowatch::geofence::GeofenceError;
use geowatch::map_sync::MapSyncError;
use geowatch::session::SessionError;

/// Exit code for bad configuration or input files.
pub const EXIT_USAGE: i32 = 2;

/// Exit code for runtime failures.
pub const EXIT_FAILURE: i32 = 1;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Configuration file could not be read or written
    ConfigFile(ConfigFileError),
    /// Track file could not be used
    Track { path: PathBuf, reason: String },
    /// Geofences could not be loaded
    Geofence(GeofenceError),
    /// Tracking session failed
    Session(SessionError),
    /// Renderer bridge failed
    Serve(MapSyncError),
    /// Failed to bind the renderer bridge
    Bind { addr: String, error: std::io::Error },
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_)
            | CliError::ConfigFile(ConfigFileError::InvalidValue { .. })
            | CliError::Track { .. } => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Geofence(GeofenceError::Fetch(_)) => {
                eprintln!();
                eprintln!("Check that [geofence] endpoint in the config file is reachable,");
                eprintln!("or pass --geofences <file> to use a local JSON file instead.");
            }
            CliError::Bind { .. } => {
                eprintln!();
                eprintln!("Another process may be using the port. Set [map] listen in the");
                eprintln!("config file or pass --listen <addr>.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "Configuration file error: {}", e),
            CliError::Track { path, reason } => {
                write!(f, "Invalid track file '{}': {}", path.display(), reason)
            }
            CliError::Geofence(e) => write!(f, "Failed to load geofences: {}", e),
            CliError::Session(e) => write!(f, "Tracking session failed: {}", e),
            CliError::Serve(e) => write!(f, "Renderer bridge error: {}", e),
            CliError::Bind { addr, error } => {
                write!(f, "Failed to listen on '{}': {}", addr, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Geofence(e) => Some(e),
            CliError::Session(e) => Some(e),
            CliError::Serve(e) => Some(e),
            CliError::Bind { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<GeofenceError> for CliError {
    fn from(e: GeofenceError) -> Self {
        CliError::Geofence(e)
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        CliError::Session(e)
    }
}

impl From<MapSyncError> for CliError {
    fn from(e: MapSyncError) -> Self {
        CliError::Serve(e)
    }
}
