//! Events published by a tracking session.

use std::time::Duration;

use crate::geofence::{GeofenceEvent, ReplaceSummary, Subject};
use crate::location::{FailureReason, Position, PositionSource, ProviderAttempt};

/// Something the UI layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A position was applied for a subject.
    PositionUpdated {
        subject: Subject,
        position: Position,
        /// Set for the device's own one-shot fix; `None` for subscription
        /// updates and reported remote positions.
        source: Option<PositionSource>,
    },
    /// A subject crossed a geofence boundary.
    Geofence(GeofenceEvent),
    /// Every location provider failed.
    LocationUnavailable { attempts: Vec<ProviderAttempt> },
    /// The continuous subscription stopped on its own.
    TrackingStopped { reason: Option<FailureReason> },
    /// A new geofence set was applied.
    GeofencesReplaced { summary: ReplaceSummary },
    /// Loading geofences from the source failed; the previous set stays.
    GeofenceLoadFailed { message: String },
    /// The renderer completed its handshake.
    MapReady,
    /// The renderer did not complete its handshake in time.
    MapUnavailable { timeout: Duration },
}
