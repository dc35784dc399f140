//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let endpoint = config.geofence.endpoint.as_deref().unwrap_or("");
    let user_id = config.geofence.user_id.as_deref().unwrap_or("");
    let geofence_file = config
        .geofence
        .file
        .as_deref()
        .map(path_to_string)
        .unwrap_or_default();

    format!(
        r#"[location]
; Host platform, decides provider fallback order:
;   android - enhanced (fused) provider first, legacy second
;   ios     - legacy provider first, enhanced second
;   other   - registration order
platform = {}
; Request a high-accuracy (GPS) fix
enable_high_accuracy = {}
; Upper bound on one provider attempt (milliseconds)
timeout_ms = {}
; A last-known fix younger than this answers a request directly (0 disables)
max_cache_age_ms = {}
; Minimum movement between two tracked positions (meters)
min_distance_filter_m = {}
; Timeout applied to each registered provider (milliseconds)
provider_timeout_ms = {}

[map]
; How long to wait for the renderer's Ready handshake (milliseconds)
handshake_timeout_ms = {}
; Zoom level used when centering the map (0-22)
default_zoom = {}
; Re-center the map on every device position
follow_self = {}
; Address of the WebSocket renderer bridge (geowatch serve)
listen = {}

[geofence]
; Backend base URL; geofences are fetched from <endpoint>/geofences?userId=<user_id>
endpoint = {}
user_id = {}
; Local JSON file with geofence records, used when endpoint is empty
file = {}
; Backend request timeout (seconds)
request_timeout_secs = {}

[logging]
; Directory for log files
directory = {}
; Log file name
file = {}
"#,
        config.location.platform,
        config.location.enable_high_accuracy,
        config.location.timeout_ms,
        config.location.max_cache_age_ms,
        config.location.min_distance_filter_m,
        config.location.provider_timeout_ms,
        config.map.handshake_timeout_ms,
        config.map.default_zoom,
        config.map.follow_self,
        config.map.listen,
        endpoint,
        user_id,
        geofence_file,
        config.geofence.request_timeout_secs,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_config_has_every_section() {
        let content = to_config_string(&ConfigFile::default());
        for section in ["[location]", "[map]", "[geofence]", "[logging]"] {
            assert!(content.contains(section), "missing {}", section);
        }
        assert!(content.contains("platform = other"));
        assert!(content.contains("endpoint = \n"));
    }
}
