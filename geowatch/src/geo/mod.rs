//! Geospatial math module
//!
//! Pure functions for great-circle distance and shape containment used by the
//! geofence engine and the position distance filter.
//!
//! # Boundary Rule
//!
//! Points exactly on a shape boundary are classified as **outside**:
//!
//! - Circle: inside only when `haversine_meters(p, center) < radius`
//! - Polygon: a point on any edge or vertex is outside, regardless of the
//!   even-odd parity of the ray cast
//!
//! All functions are stateless and safe to call from any thread.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Tolerance (in degrees) for edge tests.
const EDGE_EPSILON: f64 = 1e-12;

/// Polygons with at most this much area (square degrees) are degenerate.
pub const MIN_POLYGON_AREA_DEG2: f64 = 1e-12;

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees (-90 to 90).
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl LatLng {
    /// Create a new coordinate.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns true if both components are finite and in range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl From<(f64, f64)> for LatLng {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self::new(latitude, longitude)
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Great-circle distance between two points in meters.
///
/// Uses the haversine formula with [`EARTH_RADIUS_METERS`]. The result is
/// symmetric and exactly `0.0` for identical points.
#[inline]
pub fn haversine_meters(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Clamp guards asin against rounding slightly above 1.0 for antipodes.
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Returns true if `p` lies strictly inside the circle.
#[inline]
pub fn is_inside_circle(p: LatLng, center: LatLng, radius_meters: f64) -> bool {
    haversine_meters(p, center) < radius_meters
}

/// Returns true if `p` lies strictly inside the polygon.
///
/// The vertex sequence is treated as implicitly closed (the last vertex
/// connects back to the first). Longitude is used as the x axis and latitude
/// as the y axis.
///
/// Returns `false` for fewer than 3 vertices, zero-area polygons, and for
/// points lying on an edge or vertex.
pub fn is_inside_polygon(p: LatLng, vertices: &[LatLng]) -> bool {
    if vertices.len() < 3 || !encloses_area(vertices) {
        return false;
    }

    let (x, y) = (p.longitude, p.latitude);
    let mut inside = false;
    let mut j = vertices.len() - 1;

    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i].longitude, vertices[i].latitude);
        let (xj, yj) = (vertices[j].longitude, vertices[j].latitude);

        if on_segment(x, y, xi, yi, xj, yj) {
            return false;
        }

        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// Whether the ring encloses more than [`MIN_POLYGON_AREA_DEG2`].
#[inline]
pub fn encloses_area(vertices: &[LatLng]) -> bool {
    polygon_area_deg2(vertices).abs() > MIN_POLYGON_AREA_DEG2
}

/// Signed planar area of the ring in square degrees (shoelace formula).
///
/// Positive for counter-clockwise rings (in lng/lat space). Only the
/// magnitude matters for degeneracy checks.
pub fn polygon_area_deg2(vertices: &[LatLng]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        twice_area += vertices[j].longitude * vertices[i].latitude
            - vertices[i].longitude * vertices[j].latitude;
        j = i;
    }
    twice_area / 2.0
}

/// Returns true if (x, y) lies on the closed segment (x1, y1)-(x2, y2).
fn on_segment(x: f64, y: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> bool {
    let cross = (x - x1) * (y2 - y1) - (y - y1) * (x2 - x1);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    x >= x1.min(x2) - EDGE_EPSILON
        && x <= x1.max(x2) + EDGE_EPSILON
        && y >= y1.min(y2) - EDGE_EPSILON
        && y <= y1.max(y2) + EDGE_EPSILON
}
