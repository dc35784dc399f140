//! Common types and utilities shared across CLI commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Deserialize;
use tracing::info;

use geowatch::config::ConfigFile;
use geowatch::geofence::{GeofenceSource, HttpGeofenceSource, StaticGeofenceSource};
use geowatch::location::{
    AuthorizationResult, LocationOrchestrator, Position, ProviderChain, ProviderDescriptor,
    ProviderKind, ProviderOutcome, ScriptedLocationProvider,
};

use crate::error::CliError;

/// Default spacing between track points without explicit timestamps.
pub const DEFAULT_TRACK_INTERVAL_MS: u64 = 1_000;

/// How the platform-preferred provider fails during a replay.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PrimaryFailure {
    /// The preferred provider answers every request
    Healthy,
    /// The preferred provider times out
    Timeout,
    /// The user refuses the preferred provider's permission prompt
    Denied,
    /// Location services are switched off for the preferred provider
    Disabled,
    /// The preferred provider cannot serve requests
    Unavailable,
}

/// Arguments shared by commands that replay a track.
#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON track file with the device positions to play back
    #[arg(long)]
    pub track: PathBuf,

    /// JSON geofence file (overrides the [geofence] config section)
    #[arg(long)]
    pub geofences: Option<PathBuf>,

    /// Simulate a failing preferred provider to exercise fallback
    #[arg(long, value_enum, default_value = "healthy")]
    pub fail_primary: PrimaryFailure,

    /// Override the spacing between track points (milliseconds)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

/// Track file contents.
///
/// ```json
/// {"intervalMs": 500, "points": [{"lat": 52.52, "lng": 13.40, "accuracyMeters": 5}]}
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackFile {
    #[serde(default)]
    interval_ms: Option<u64>,
    points: Vec<TrackPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackPoint {
    lat: f64,
    lng: f64,
    #[serde(default)]
    accuracy_meters: Option<f64>,
    #[serde(default)]
    at_millis: Option<i64>,
}

/// A validated track ready to be played back.
#[derive(Debug, Clone)]
pub struct Track {
    pub positions: Vec<Position>,
    pub interval: Duration,
}

impl Track {
    /// Parse a track, stamping points without a timestamp relative to
    /// `start_millis`.
    pub fn parse(
        json: &str,
        start_millis: i64,
        interval_override: Option<u64>,
    ) -> Result<Self, String> {
        let file: TrackFile = serde_json::from_str(json).map_err(|e| e.to_string())?;
        if file.points.is_empty() {
            return Err("track has no points".to_string());
        }

        let interval_ms = interval_override
            .or(file.interval_ms)
            .unwrap_or(DEFAULT_TRACK_INTERVAL_MS);

        let mut positions = Vec::with_capacity(file.points.len());
        for (index, point) in file.points.into_iter().enumerate() {
            let at = point
                .at_millis
                .unwrap_or(start_millis + index as i64 * interval_ms as i64);
            let mut position = Position::new(point.lat, point.lng, at);
            if let Some(accuracy) = point.accuracy_meters {
                position = position.with_accuracy(accuracy);
            }
            if !position.lat_lng().is_valid() {
                return Err(format!(
                    "point {} has invalid coordinates ({}, {})",
                    index, point.lat, point.lng
                ));
            }
            positions.push(position);
        }

        Ok(Self {
            positions,
            interval: Duration::from_millis(interval_ms),
        })
    }

    /// Read and parse a track file.
    pub fn load(path: &Path, interval_override: Option<u64>) -> Result<Self, CliError> {
        let track_error = |reason: String| CliError::Track {
            path: path.to_path_buf(),
            reason,
        };
        let json = fs::read_to_string(path).map_err(|e| track_error(e.to_string()))?;
        let now = chrono::Utc::now().timestamp_millis();
        Self::parse(&json, now, interval_override).map_err(track_error)
    }
}

/// Load the configuration, from `path` when given.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// Build an orchestrator whose providers replay `track`.
///
/// Two providers are registered, one per kind, and ordered for the
/// configured platform. The preferred one fails as `failure` says; the
/// other serves the first point as a one-shot fix and streams the rest.
pub fn replay_orchestrator(
    track: &Track,
    failure: PrimaryFailure,
    config: &ConfigFile,
) -> LocationOrchestrator {
    let platform = config.location.platform;
    let timeout = config.provider_timeout();

    let mut descriptors = vec![
        ProviderDescriptor::new("enhanced", ProviderKind::Enhanced).with_timeout(timeout),
        ProviderDescriptor::new("legacy", ProviderKind::Legacy).with_timeout(timeout),
    ];
    descriptors.sort_by_key(|descriptor| platform.rank(descriptor.kind));

    let mut chain = ProviderChain::new();
    for (index, descriptor) in descriptors.into_iter().enumerate() {
        let preferred = index == 0;
        let (descriptor, provider) = if preferred && failure != PrimaryFailure::Healthy {
            failing_provider(descriptor, failure)
        } else {
            (descriptor, playback_provider(track))
        };
        chain = chain.with(descriptor, Arc::new(provider));
    }

    LocationOrchestrator::new(chain.ordered_for(platform), config.acquisition_options())
}

fn playback_provider(track: &Track) -> ScriptedLocationProvider {
    let mut outcomes = track
        .positions
        .iter()
        .copied()
        .map(ProviderOutcome::Success);
    let first = outcomes
        .next()
        .unwrap_or(ProviderOutcome::Unavailable("empty track".to_string()));
    ScriptedLocationProvider::always(first).with_watch(outcomes.collect(), track.interval)
}

fn failing_provider(
    descriptor: ProviderDescriptor,
    failure: PrimaryFailure,
) -> (ProviderDescriptor, ScriptedLocationProvider) {
    match failure {
        PrimaryFailure::Denied => (
            descriptor.with_authorization(true),
            ScriptedLocationProvider::new().with_authorization(AuthorizationResult::Denied),
        ),
        PrimaryFailure::Timeout => (
            descriptor,
            ScriptedLocationProvider::always(ProviderOutcome::Timeout),
        ),
        PrimaryFailure::Disabled => (
            descriptor,
            ScriptedLocationProvider::always(ProviderOutcome::ServicesDisabled),
        ),
        PrimaryFailure::Unavailable | PrimaryFailure::Healthy => {
            (descriptor, ScriptedLocationProvider::new())
        }
    }
}

/// Pick the geofence source: an explicit file, then the configured
/// endpoint, then the configured file.
pub fn geofence_source(
    file: Option<&Path>,
    config: &ConfigFile,
) -> Result<Option<Arc<dyn GeofenceSource>>, CliError> {
    if let Some(path) = file {
        info!(path = %path.display(), "Using geofence file");
        return Ok(Some(Arc::new(StaticGeofenceSource::from_file(path))));
    }

    if let Some(endpoint) = &config.geofence.endpoint {
        let user_id = config.geofence.user_id.clone().ok_or_else(|| {
            CliError::Config(
                "[geofence] endpoint is set but user_id is empty. \
                 Set user_id in config.ini"
                    .to_string(),
            )
        })?;
        info!(endpoint = %endpoint, user = %user_id, "Using geofence backend");
        let source =
            HttpGeofenceSource::new(endpoint, user_id, config.geofence_request_timeout())?;
        return Ok(Some(Arc::new(source)));
    }

    Ok(config.geofence.file.as_ref().map(|path| {
        info!(path = %path.display(), "Using geofence file from config");
        Arc::new(StaticGeofenceSource::from_file(path)) as Arc<dyn GeofenceSource>
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geowatch::location::Platform;
    use tokio_util::sync::CancellationToken;

    const TRACK: &str = r#"{
        "intervalMs": 10,
        "points": [
            {"lat": 1.0, "lng": 1.0, "accuracyMeters": 5.0},
            {"lat": 1.001, "lng": 1.0},
            {"lat": 1.002, "lng": 1.0, "atMillis": 99999}
        ]
    }"#;

    #[test]
    fn test_track_timestamps_and_interval() {
        let track = Track::parse(TRACK, 1_000, None).unwrap();

        assert_eq!(track.interval, Duration::from_millis(10));
        let stamps: Vec<i64> = track
            .positions
            .iter()
            .map(|p| p.captured_at_millis)
            .collect();
        assert_eq!(stamps, vec![1_000, 1_010, 99_999]);
        assert_eq!(track.positions[0].accuracy_meters, Some(5.0));
    }

    #[test]
    fn test_track_interval_override() {
        let track = Track::parse(TRACK, 0, Some(250)).unwrap();
        assert_eq!(track.interval, Duration::from_millis(250));
        assert_eq!(track.positions[1].captured_at_millis, 250);
    }

    #[test]
    fn test_track_rejects_empty_and_invalid() {
        assert!(Track::parse(r#"{"points": []}"#, 0, None).is_err());
        let err = Track::parse(r#"{"points": [{"lat": 95.0, "lng": 0.0}]}"#, 0, None)
            .unwrap_err();
        assert!(err.contains("point 0"));
    }

    #[test]
    fn test_load_config_missing_file_gives_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = load_config(Some(&temp.path().join("none.ini"))).unwrap();
        assert_eq!(config.location.platform, Platform::Other);
    }

    #[tokio::test]
    async fn test_replay_orchestrator_falls_back_past_failing_primary() {
        let track = Track::parse(TRACK, 1_000, None).unwrap();
        let mut config = ConfigFile::default();
        config.location.platform = Platform::Android;

        let orchestrator = replay_orchestrator(&track, PrimaryFailure::Timeout, &config);
        let ids: Vec<&str> = orchestrator
            .chain()
            .descriptors()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["enhanced", "legacy"]);

        let acquisition = orchestrator
            .acquire(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(acquisition.position, track.positions[0]);
        assert_eq!(acquisition.attempts.len(), 1);
        assert_eq!(acquisition.attempts[0].provider_id, "enhanced");
    }

    #[test]
    fn test_explicit_geofence_file_wins() {
        let mut config = ConfigFile::default();
        config.geofence.endpoint = Some("https://example.invalid".to_string());
        let source = geofence_source(Some(Path::new("zones.json")), &config).unwrap();
        assert!(source.is_some());
    }

    #[test]
    fn test_endpoint_without_user_is_config_error() {
        let mut config = ConfigFile::default();
        config.geofence.endpoint = Some("https://example.invalid".to_string());
        assert!(matches!(
            geofence_source(None, &config),
            Err(CliError::Config(_))
        ));
    }
}
