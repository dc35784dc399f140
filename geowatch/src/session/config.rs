//! Tracking session configuration.

/// Marker id used for the tracked device.
pub const SELF_MARKER_ID: &str = "self";

/// Default capacity of the session event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a [`TrackingSession`](super::TrackingSession).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Re-center the map on every accepted device position.
    pub follow_self: bool,
    /// Label shown on the device marker.
    pub self_marker_label: Option<String>,
    /// Zoom for follow-mode `CenterOn`; `None` uses the channel default.
    pub follow_zoom: Option<f64>,
    /// Broadcast capacity; slow subscribers lag past this many events.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            follow_self: true,
            self_marker_label: None,
            follow_zoom: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn with_follow_self(mut self, follow: bool) -> Self {
        self.follow_self = follow;
        self
    }

    pub fn with_self_marker_label(mut self, label: impl Into<String>) -> Self {
        self.self_marker_label = Some(label.into());
        self
    }

    pub fn with_follow_zoom(mut self, zoom: f64) -> Self {
        self.follow_zoom = Some(zoom);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
