//! Geofence domain types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::GeofenceError;
use crate::geo::{encloses_area, is_inside_circle, is_inside_polygon, LatLng};
use crate::location::Position;

/// Minimum number of vertices in a polygon ring.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Who a position belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    /// The device running the session.
    SelfDevice,
    /// Another tracked party, e.g. a teammate's reported position.
    Remote(String),
}

impl Subject {
    pub fn remote(name: impl Into<String>) -> Self {
        Self::Remote(name.into())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfDevice => write!(f, "self"),
            Self::Remote(name) => write!(f, "{}", name),
        }
    }
}

/// A validated, implicitly closed polygon ring.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<LatLng>,
}

impl Polygon {
    /// Validate and build a polygon.
    ///
    /// A trailing vertex equal to the first is removed, since the ring is
    /// closed implicitly.
    ///
    /// # Errors
    ///
    /// Fails for fewer than three distinct vertices, invalid coordinates or
    /// zero area.
    pub fn new(id: &str, mut vertices: Vec<LatLng>) -> Result<Self, GeofenceError> {
        if vertices.len() > MIN_POLYGON_VERTICES && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < MIN_POLYGON_VERTICES {
            return Err(GeofenceError::invalid(
                id,
                format!(
                    "polygon needs at least {} vertices, got {}",
                    MIN_POLYGON_VERTICES,
                    vertices.len()
                ),
            ));
        }
        if let Some(bad) = vertices.iter().find(|v| !v.is_valid()) {
            return Err(GeofenceError::invalid(
                id,
                format!("vertex {} is out of range", bad),
            ));
        }
        if !encloses_area(&vertices) {
            return Err(GeofenceError::invalid(id, "polygon has zero area"));
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[LatLng] {
        &self.vertices
    }
}

/// Geometry of a geofence.
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceShape {
    Circle { center: LatLng, radius_meters: f64 },
    Polygon(Polygon),
}

impl GeofenceShape {
    /// Validate and build a circle.
    pub fn circle(id: &str, center: LatLng, radius_meters: f64) -> Result<Self, GeofenceError> {
        if !center.is_valid() {
            return Err(GeofenceError::invalid(
                id,
                format!("center {} is out of range", center),
            ));
        }
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(GeofenceError::invalid(
                id,
                format!("radius must be positive, got {}", radius_meters),
            ));
        }
        Ok(Self::Circle {
            center,
            radius_meters,
        })
    }

    /// Validate and build a polygon.
    pub fn polygon(id: &str, vertices: Vec<LatLng>) -> Result<Self, GeofenceError> {
        Polygon::new(id, vertices).map(Self::Polygon)
    }

    /// Containment test. Boundary points are outside for both shapes.
    pub fn contains(&self, point: LatLng) -> bool {
        match self {
            Self::Circle {
                center,
                radius_meters,
            } => is_inside_circle(point, *center, *radius_meters),
            Self::Polygon(polygon) => is_inside_polygon(point, polygon.vertices()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Circle { .. } => "circle",
            Self::Polygon(_) => "polygon",
        }
    }
}

/// A named zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Geofence {
    pub id: String,
    pub name: String,
    pub shape: GeofenceShape,
    pub is_active: bool,
    /// Display colour passed through to the renderer untouched.
    pub color: Option<String>,
}

impl Geofence {
    /// Active geofence without a colour.
    pub fn new(id: impl Into<String>, name: impl Into<String>, shape: GeofenceShape) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            shape,
            is_active: true,
            color: None,
        }
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn contains(&self, point: LatLng) -> bool {
        self.shape.contains(point)
    }
}

/// Containment of one subject in one geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainmentState {
    #[default]
    Outside,
    Inside,
}

impl ContainmentState {
    pub fn from_inside(inside: bool) -> Self {
        if inside {
            Self::Inside
        } else {
            Self::Outside
        }
    }
}

/// Direction of a boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    Entered,
    Exited,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entered => write!(f, "entered"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Edge-triggered boundary crossing.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceEvent {
    pub kind: TransitionKind,
    pub subject: Subject,
    pub geofence_id: String,
    pub geofence_name: String,
    /// The position that caused the transition.
    pub position: Position,
}

impl fmt::Display for GeofenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} '{}' ({}) at {}",
            self.subject,
            self.kind,
            self.geofence_name,
            self.geofence_id,
            self.position.lat_lng()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<LatLng> {
        vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 2.0),
            LatLng::new(2.0, 2.0),
            LatLng::new(2.0, 0.0),
        ]
    }

    #[test]
    fn test_polygon_rejects_too_few_vertices() {
        let err = Polygon::new("z", square()[..2].to_vec()).unwrap_err();
        assert!(err.to_string().contains("at least 3"));
    }

    #[test]
    fn test_polygon_drops_explicit_closing_vertex() {
        let mut ring = square();
        ring.push(LatLng::new(0.0, 0.0));
        let polygon = Polygon::new("z", ring).unwrap();
        assert_eq!(polygon.vertices().len(), 4);
    }

    #[test]
    fn test_polygon_rejects_collinear_ring() {
        let line = vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(1.0, 1.0),
            LatLng::new(2.0, 2.0),
        ];
        assert!(Polygon::new("z", line).is_err());
    }

    #[test]
    fn test_polygon_area_threshold_matches_containment() {
        let sliver = vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(1e-6, 0.0),
            LatLng::new(0.0, 2e-7),
        ];
        assert!(Polygon::new("sliver", sliver).is_err());

        let small = vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(1e-5, 0.0),
            LatLng::new(0.0, 1e-5),
        ];
        let polygon = Polygon::new("small", small).unwrap();
        let centroid = LatLng::new(1e-5 / 3.0, 1e-5 / 3.0);
        assert!(is_inside_polygon(centroid, polygon.vertices()));
    }

    #[test]
    fn test_circle_validation() {
        assert!(GeofenceShape::circle("c", LatLng::new(0.0, 0.0), 0.0).is_err());
        assert!(GeofenceShape::circle("c", LatLng::new(0.0, 0.0), f64::NAN).is_err());
        assert!(GeofenceShape::circle("c", LatLng::new(95.0, 0.0), 10.0).is_err());
        assert!(GeofenceShape::circle("c", LatLng::new(0.0, 0.0), 10.0).is_ok());
    }

    #[test]
    fn test_shape_containment() {
        let polygon = GeofenceShape::polygon("p", square()).unwrap();
        assert!(polygon.contains(LatLng::new(1.0, 1.0)));
        assert!(!polygon.contains(LatLng::new(3.0, 3.0)));
        assert!(!polygon.contains(LatLng::new(0.0, 0.0)));

        let circle = GeofenceShape::circle("c", LatLng::new(0.0, 0.0), 1_000.0).unwrap();
        assert!(circle.contains(LatLng::new(0.001, 0.0)));
        assert!(!circle.contains(LatLng::new(0.1, 0.0)));
    }

    #[test]
    fn test_subject_display() {
        assert_eq!(Subject::SelfDevice.to_string(), "self");
        assert_eq!(Subject::remote("unit-7").to_string(), "unit-7");
    }
}
