//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::location::Platform;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [location] section
    if let Some(section) = ini.section(Some("location")) {
        if let Some(v) = section.get("platform") {
            config.location.platform = Platform::from_str(v).map_err(|_| {
                ConfigFileError::invalid(
                    "location",
                    "platform",
                    v,
                    "must be one of: android, ios, other",
                )
            })?;
        }
        if let Some(v) = parse_bool(section, "location", "enable_high_accuracy")? {
            config.location.enable_high_accuracy = v;
        }
        if let Some(v) = parse_millis(section, "location", "timeout_ms", false)? {
            config.location.timeout_ms = v;
        }
        if let Some(v) = parse_millis(section, "location", "max_cache_age_ms", true)? {
            config.location.max_cache_age_ms = v;
        }
        if let Some(v) = section.get("min_distance_filter_m") {
            config.location.min_distance_filter_m = v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|m| m.is_finite() && *m >= 0.0)
                .ok_or_else(|| {
                    ConfigFileError::invalid(
                        "location",
                        "min_distance_filter_m",
                        v,
                        "must be a non-negative number (meters)",
                    )
                })?;
        }
        if let Some(v) = parse_millis(section, "location", "provider_timeout_ms", false)? {
            config.location.provider_timeout_ms = v;
        }
    }

    // [map] section
    if let Some(section) = ini.section(Some("map")) {
        if let Some(v) = parse_millis(section, "map", "handshake_timeout_ms", false)? {
            config.map.handshake_timeout_ms = v;
        }
        if let Some(v) = section.get("default_zoom") {
            config.map.default_zoom = v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|z| (0.0..=22.0).contains(z))
                .ok_or_else(|| {
                    ConfigFileError::invalid("map", "default_zoom", v, "must be between 0 and 22")
                })?;
        }
        if let Some(v) = parse_bool(section, "map", "follow_self")? {
            config.map.follow_self = v;
        }
        if let Some(v) = non_empty(section, "listen") {
            config.map.listen = v.to_string();
        }
    }

    // [geofence] section
    if let Some(section) = ini.section(Some("geofence")) {
        if let Some(v) = non_empty(section, "endpoint") {
            if !(v.starts_with("http://") || v.starts_with("https://")) {
                return Err(ConfigFileError::invalid(
                    "geofence",
                    "endpoint",
                    v,
                    "must be an http:// or https:// URL",
                ));
            }
            config.geofence.endpoint = Some(v.to_string());
        }
        if let Some(v) = non_empty(section, "user_id") {
            config.geofence.user_id = Some(v.to_string());
        }
        if let Some(v) = non_empty(section, "file") {
            config.geofence.file = Some(expand_tilde(v));
        }
        if let Some(v) = section.get("request_timeout_secs") {
            config.geofence.request_timeout_secs = v
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    ConfigFileError::invalid(
                        "geofence",
                        "request_timeout_secs",
                        v,
                        "must be a positive integer (seconds)",
                    )
                })?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bool(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<bool>, ConfigFileError> {
    let Some(v) = section.get(key) else {
        return Ok(None);
    };
    match v.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(Some(true)),
        "false" | "no" | "0" | "off" => Ok(Some(false)),
        _ => Err(ConfigFileError::invalid(
            section_name,
            key,
            v,
            "must be true or false",
        )),
    }
}

fn parse_millis(
    section: &Properties,
    section_name: &str,
    key: &str,
    allow_zero: bool,
) -> Result<Option<u64>, ConfigFileError> {
    let Some(v) = section.get(key) else {
        return Ok(None);
    };
    let reason = if allow_zero {
        "must be a non-negative integer (milliseconds)"
    } else {
        "must be a positive integer (milliseconds)"
    };
    v.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| allow_zero || *ms > 0)
        .map(Some)
        .ok_or_else(|| ConfigFileError::invalid(section_name, key, v, reason))
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}
