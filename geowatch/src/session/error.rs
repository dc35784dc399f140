//! Tracking session errors.

use thiserror::Error;

use crate::geofence::GeofenceError;
use crate::location::LocationError;
use crate::map_sync::MapSyncError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Geofence(#[from] GeofenceError),

    #[error(transparent)]
    MapSync(#[from] MapSyncError),

    #[error("tracking session already started")]
    AlreadyStarted,

    #[error("tracking session has been shut down")]
    ShutDown,

    #[error("no geofence source configured")]
    NoGeofenceSource,
}
