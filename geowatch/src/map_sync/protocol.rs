//! Wire protocol between the host and the map renderer.
//!
//! Every message is a JSON object whose `type` field names the message.
//!
//! Host to renderer: `UpdateMarker`, `ReplaceGeofences`, `CenterOn`.
//! Renderer to host: `Ready`, `Loaded`, `MarkerTapped`, `Error`.
//!
//! Inbound messages with an unrecognised `type` are reported as
//! [`Inbound::Unknown`] so newer renderers can talk to older hosts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::MapSyncError;
use crate::geo::LatLng;
use crate::geofence::{Geofence, GeofenceShape};

/// Protocol revision spoken by this host.
pub const PROTOCOL_VERSION: u32 = 1;

/// Why a geofence set is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncReason {
    /// First set sent to this renderer session.
    Initial,
    /// Replacement after a reload or a backend refresh.
    Refresh,
}

/// Marker placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerUpdate {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl MarkerUpdate {
    pub fn new(id: impl Into<String>, at: LatLng) -> Self {
        Self {
            id: id.into(),
            lat: at.latitude,
            lng: at.longitude,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Camera target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapCenter {
    pub lat: f64,
    pub lng: f64,
    pub zoom: f64,
}

impl MapCenter {
    pub fn new(at: LatLng, zoom: f64) -> Self {
        Self {
            lat: at.latitude,
            lng: at.longitude,
            zoom,
        }
    }
}

/// Shape part of a geofence payload, tagged by `shape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum ShapePayload {
    Circle {
        lat: f64,
        lng: f64,
        #[serde(rename = "radiusMeters")]
        radius_meters: f64,
    },
    Polygon {
        /// `[lat, lng]` pairs; the ring is closed implicitly.
        vertices: Vec<[f64; 2]>,
    },
}

/// Geofence as rendered on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofencePayload {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub shape: ShapePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl From<&Geofence> for GeofencePayload {
    fn from(geofence: &Geofence) -> Self {
        let shape = match &geofence.shape {
            GeofenceShape::Circle {
                center,
                radius_meters,
            } => ShapePayload::Circle {
                lat: center.latitude,
                lng: center.longitude,
                radius_meters: *radius_meters,
            },
            GeofenceShape::Polygon(polygon) => ShapePayload::Polygon {
                vertices: polygon
                    .vertices()
                    .iter()
                    .map(|v| [v.latitude, v.longitude])
                    .collect(),
            },
        };
        Self {
            id: geofence.id.clone(),
            name: geofence.name.clone(),
            shape,
            color: geofence.color.clone(),
        }
    }
}

/// Host to renderer message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    UpdateMarker(MarkerUpdate),
    ReplaceGeofences {
        geofences: Vec<GeofencePayload>,
        reason: SyncReason,
    },
    CenterOn(MapCenter),
}

impl OutboundMessage {
    /// Build a `ReplaceGeofences` from domain geofences.
    pub fn replace_geofences(geofences: &[Geofence], reason: SyncReason) -> Self {
        Self::ReplaceGeofences {
            geofences: geofences.iter().map(GeofencePayload::from).collect(),
            reason,
        }
    }

    /// Message type name as sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateMarker(_) => "UpdateMarker",
            Self::ReplaceGeofences { .. } => "ReplaceGeofences",
            Self::CenterOn(_) => "CenterOn",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Renderer to host message with a recognised type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RendererMessage {
    Ready {
        #[serde(rename = "sessionToken")]
        session_token: String,
        #[serde(
            rename = "protocolVersion",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        protocol_version: Option<u32>,
    },
    Loaded {},
    MarkerTapped {
        id: String,
    },
    Error {
        message: String,
    },
}

const KNOWN_INBOUND_TYPES: &[&str] = &["Ready", "Loaded", "MarkerTapped", "Error"];

impl RendererMessage {
    /// `Ready` announcing the current protocol version.
    pub fn ready(session_token: impl Into<String>) -> Self {
        Self::Ready {
            session_token: session_token.into(),
            protocol_version: Some(PROTOCOL_VERSION),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Known(RendererMessage),
    /// Well-formed message with a type this host does not handle.
    Unknown(String),
}

/// Parse raw renderer text.
///
/// # Errors
///
/// [`MapSyncError::RendererProtocolViolation`] when the text is not a JSON
/// object with a string `type`, or a known type has a malformed payload.
pub fn parse_inbound(raw: &str) -> Result<Inbound, MapSyncError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| MapSyncError::RendererProtocolViolation(format!("not JSON: {}", e)))?;

    let kind = value
        .as_object()
        .ok_or_else(|| MapSyncError::RendererProtocolViolation("not an object".to_string()))?
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MapSyncError::RendererProtocolViolation("missing string 'type'".to_string())
        })?
        .to_string();

    if !KNOWN_INBOUND_TYPES.contains(&kind.as_str()) {
        return Ok(Inbound::Unknown(kind));
    }

    serde_json::from_value(value).map(Inbound::Known).map_err(|e| {
        MapSyncError::RendererProtocolViolation(format!("malformed {}: {}", kind, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_marker_wire_shape() {
        let msg = OutboundMessage::UpdateMarker(MarkerUpdate::new("self", LatLng::new(1.5, 2.5)));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "UpdateMarker", "id": "self", "lat": 1.5, "lng": 2.5}));
    }

    #[test]
    fn test_replace_geofences_wire_shape() {
        let circle = Geofence::new(
            "c1",
            "Gate",
            GeofenceShape::circle("c1", LatLng::new(1.0, 2.0), 50.0).unwrap(),
        )
        .with_color("#00ff00");
        let polygon = Geofence::new(
            "p1",
            "Yard",
            GeofenceShape::polygon(
                "p1",
                vec![
                    LatLng::new(0.0, 0.0),
                    LatLng::new(0.0, 1.0),
                    LatLng::new(1.0, 1.0),
                ],
            )
            .unwrap(),
        );

        let msg = OutboundMessage::replace_geofences(&[circle, polygon], SyncReason::Refresh);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "ReplaceGeofences");
        assert_eq!(value["reason"], "refresh");
        assert_eq!(
            value["geofences"][0],
            json!({"id": "c1", "name": "Gate", "shape": "circle", "lat": 1.0, "lng": 2.0,
                   "radiusMeters": 50.0, "color": "#00ff00"})
        );
        assert_eq!(value["geofences"][1]["shape"], "polygon");
        assert_eq!(value["geofences"][1]["vertices"], json!([[0.0, 0.0], [0.0, 1.0], [1.0, 1.0]]));
    }

    #[test]
    fn test_center_on_wire_shape() {
        let msg = OutboundMessage::CenterOn(MapCenter::new(LatLng::new(3.0, 4.0), 15.0));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "CenterOn", "lat": 3.0, "lng": 4.0, "zoom": 15.0}));
    }

    #[test]
    fn test_parse_known_inbound() {
        assert_eq!(
            parse_inbound(r#"{"type":"Ready","sessionToken":"abc"}"#).unwrap(),
            Inbound::Known(RendererMessage::Ready {
                session_token: "abc".into(),
                protocol_version: None
            })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"Loaded"}"#).unwrap(),
            Inbound::Known(RendererMessage::Loaded {})
        );
        assert_eq!(
            parse_inbound(r#"{"type":"MarkerTapped","id":"m1","extra":true}"#).unwrap(),
            Inbound::Known(RendererMessage::MarkerTapped { id: "m1".into() })
        );
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        assert_eq!(
            parse_inbound(r#"{"type":"ZoomChanged","zoom":3}"#).unwrap(),
            Inbound::Unknown("ZoomChanged".into())
        );
    }

    #[test]
    fn test_malformed_inbound_is_protocol_violation() {
        for raw in [
            "not json",
            "[1,2]",
            r#"{"id":"x"}"#,
            r#"{"type":7}"#,
            r#"{"type":"MarkerTapped"}"#,
            r#"{"type":"Ready","sessionToken":5}"#,
        ] {
            assert!(
                matches!(
                    parse_inbound(raw),
                    Err(MapSyncError::RendererProtocolViolation(_))
                ),
                "expected violation for {}",
                raw
            );
        }
    }

    #[test]
    fn test_ready_builder_round_trips() {
        let raw = RendererMessage::ready("t1").to_json().unwrap();
        assert!(raw.contains("\"protocolVersion\":1"));
        assert_eq!(
            parse_inbound(&raw).unwrap(),
            Inbound::Known(RendererMessage::ready("t1"))
        );
    }
}
