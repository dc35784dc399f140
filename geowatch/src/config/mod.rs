//! User configuration from `~/.geowatch/config.ini`.
//!
//! # Example
//!
//! ```no_run
//! use geowatch::config::ConfigFile;
//!
//! let config = ConfigFile::load().unwrap_or_default();
//! let options = config.acquisition_options();
//! let map = config.map_sync_config();
//! ```

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, GeofenceSettings, LocationSettings, LoggingSettings, MapSettings,
    DEFAULT_GEOFENCE_TIMEOUT_SECS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LISTEN_ADDR,
    DEFAULT_LOCATION_TIMEOUT_MS, DEFAULT_LOG_FILE, DEFAULT_MAP_ZOOM, DEFAULT_MAX_CACHE_AGE_MS,
    DEFAULT_MIN_DISTANCE_FILTER_M, DEFAULT_PROVIDER_TIMEOUT_MS,
};
