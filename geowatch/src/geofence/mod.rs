//! Geofence model, evaluation engine and backend ingestion.
//!
//! Geofences are circles or implicitly closed polygons, validated on
//! construction. The [`GeofenceEngine`] tracks per-subject containment and
//! emits [`GeofenceEvent`]s only when a subject crosses a boundary.

mod engine;
mod error;
mod model;
mod source;

pub use engine::{
    ContainmentSnapshot, EvaluationOutcome, GeofenceEngine, ReplaceSummary, SubjectSnapshot,
};
pub use error::GeofenceError;
pub use model::{
    ContainmentState, Geofence, GeofenceEvent, GeofenceShape, Polygon, Subject, TransitionKind,
    MIN_POLYGON_VERTICES,
};
pub use source::{
    into_geofences, parse_geofences, GeofenceRecord, GeofenceSource, HttpGeofenceSource,
    RecordId, RecordPoint, StaticGeofenceSource, DEFAULT_REQUEST_TIMEOUT,
};
