//! Tracking session composition root.

mod config;
mod error;
mod events;
mod tracking;

pub use config::{SessionConfig, DEFAULT_EVENT_CAPACITY, SELF_MARKER_ID};
pub use error::SessionError;
pub use events::SessionEvent;
pub use tracking::TrackingSession;
