//! Settings structs for `config.ini`, one per section.

use std::path::PathBuf;
use std::time::Duration;

use crate::location::{AcquisitionOptions, Platform};
use crate::map_sync::MapSyncConfig;
use crate::session::SessionConfig;

/// Default `[location] timeout_ms`.
pub const DEFAULT_LOCATION_TIMEOUT_MS: u64 = 15_000;
/// Default `[location] max_cache_age_ms`.
pub const DEFAULT_MAX_CACHE_AGE_MS: u64 = 10_000;
/// Default `[location] min_distance_filter_m`.
pub const DEFAULT_MIN_DISTANCE_FILTER_M: f64 = 10.0;
/// Default `[location] provider_timeout_ms`.
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;
/// Default `[map] handshake_timeout_ms`.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Default `[map] default_zoom`.
pub const DEFAULT_MAP_ZOOM: f64 = 15.0;
/// Default `[map] listen`.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8765";
/// Default `[geofence] request_timeout_secs`.
pub const DEFAULT_GEOFENCE_TIMEOUT_SECS: u64 = 10;
/// Default `[logging] file`.
pub const DEFAULT_LOG_FILE: &str = "geowatch.log";

/// `[location]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSettings {
    pub platform: Platform,
    pub enable_high_accuracy: bool,
    pub timeout_ms: u64,
    /// 0 disables the last-known cache.
    pub max_cache_age_ms: u64,
    pub min_distance_filter_m: f64,
    /// Timeout applied to each provider descriptor.
    pub provider_timeout_ms: u64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            platform: Platform::Other,
            enable_high_accuracy: true,
            timeout_ms: DEFAULT_LOCATION_TIMEOUT_MS,
            max_cache_age_ms: DEFAULT_MAX_CACHE_AGE_MS,
            min_distance_filter_m: DEFAULT_MIN_DISTANCE_FILTER_M,
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
        }
    }
}

/// `[map]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSettings {
    pub handshake_timeout_ms: u64,
    pub default_zoom: f64,
    pub follow_self: bool,
    /// Address the WebSocket renderer bridge binds to.
    pub listen: String,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            default_zoom: DEFAULT_MAP_ZOOM,
            follow_self: true,
            listen: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

/// `[geofence]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceSettings {
    /// Backend base URL; when unset, `file` is used if present.
    pub endpoint: Option<String>,
    pub user_id: Option<String>,
    /// Local JSON file of backend-shaped records.
    pub file: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for GeofenceSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            user_id: None,
            file: None,
            request_timeout_secs: DEFAULT_GEOFENCE_TIMEOUT_SECS,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: super::file::config_directory().join("logs"),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// Parsed `config.ini`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub location: LocationSettings,
    pub map: MapSettings,
    pub geofence: GeofenceSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Acquisition options from `[location]`.
    pub fn acquisition_options(&self) -> AcquisitionOptions {
        AcquisitionOptions::default()
            .with_high_accuracy(self.location.enable_high_accuracy)
            .with_timeout(Duration::from_millis(self.location.timeout_ms))
            .with_max_cache_age(Duration::from_millis(self.location.max_cache_age_ms))
            .with_min_distance_filter(self.location.min_distance_filter_m)
    }

    /// Per-provider timeout from `[location]`.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.location.provider_timeout_ms)
    }

    /// Map channel config from `[map]`.
    pub fn map_sync_config(&self) -> MapSyncConfig {
        MapSyncConfig::default()
            .with_handshake_timeout(Duration::from_millis(self.map.handshake_timeout_ms))
            .with_default_zoom(self.map.default_zoom)
    }

    /// Session config from `[map]`.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().with_follow_self(self.map.follow_self)
    }

    pub fn geofence_request_timeout(&self) -> Duration {
        Duration::from_secs(self.geofence.request_timeout_secs)
    }
}
