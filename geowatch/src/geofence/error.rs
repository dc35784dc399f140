//! Geofence error types.

use thiserror::Error;

/// Errors from geofence validation and ingestion.
#[derive(Debug, Error)]
pub enum GeofenceError {
    /// A geofence failed client-side validation.
    #[error("invalid geofence '{id}': {reason}")]
    InvalidGeofence { id: String, reason: String },

    /// The backend request failed.
    #[error("failed to fetch geofences: {0}")]
    Fetch(String),

    /// The backend answered with something that is not a geofence list.
    #[error("failed to parse geofences: {0}")]
    Parse(#[from] serde_json::Error),

    /// Reading a local geofence file failed.
    #[error("failed to read geofence file: {0}")]
    Io(#[from] std::io::Error),
}

impl GeofenceError {
    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidGeofence {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for GeofenceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}
