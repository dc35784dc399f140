//! Geofence ingestion from the backend.
//!
//! The backend serves `GET {base}/geofences?userId=...` as a JSON array of
//! [`GeofenceRecord`]s. Records are validated client-side before they reach
//! the engine; an invalid record is logged and dropped while the rest of the
//! batch is kept.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::GeofenceError;
use super::model::{Geofence, GeofenceShape};
use crate::geo::LatLng;
use crate::location::BoxFuture;

/// Default timeout for a backend request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifier as sent by the backend (string or integer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A coordinate as sent by the backend: `[lat, lng]` or `{lat, lng}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordPoint {
    Pair([f64; 2]),
    Object(LatLng),
}

impl From<RecordPoint> for LatLng {
    fn from(point: RecordPoint) -> Self {
        match point {
            RecordPoint::Pair([lat, lng]) => LatLng::new(lat, lng),
            RecordPoint::Object(latlng) => latlng,
        }
    }
}

/// Backend wire shape of one geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceRecord {
    pub id: RecordId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub polygon: Option<Vec<RecordPoint>>,
    #[serde(default)]
    pub center: Option<RecordPoint>,
    #[serde(default, alias = "radiusMeters")]
    pub radius_meters: Option<f64>,
    #[serde(default = "default_active", alias = "isActive")]
    pub is_active: bool,
    #[serde(default)]
    pub color: Option<String>,
}

fn default_active() -> bool {
    true
}

impl GeofenceRecord {
    /// Validate into a domain geofence.
    ///
    /// A record with a polygon is a polygon zone; otherwise it needs a center
    /// and radius.
    pub fn into_geofence(self) -> Result<Geofence, GeofenceError> {
        let id = self.id.to_string();
        let shape = match (self.polygon, self.center, self.radius_meters) {
            (Some(points), _, _) => {
                GeofenceShape::polygon(&id, points.into_iter().map(LatLng::from).collect())?
            }
            (None, Some(center), Some(radius)) => {
                GeofenceShape::circle(&id, center.into(), radius)?
            }
            (None, Some(_), None) => {
                return Err(GeofenceError::invalid(&id, "circle without radius"))
            }
            (None, None, _) => return Err(GeofenceError::invalid(&id, "no shape")),
        };

        let name = if self.name.trim().is_empty() {
            id.clone()
        } else {
            self.name
        };

        Ok(Geofence {
            id,
            name,
            shape,
            is_active: self.is_active,
            color: self.color,
        })
    }
}

/// Validate a batch, dropping (and logging) invalid records.
pub fn into_geofences(records: Vec<GeofenceRecord>) -> Vec<Geofence> {
    let total = records.len();
    let geofences: Vec<Geofence> = records
        .into_iter()
        .filter_map(|record| match record.into_geofence() {
            Ok(geofence) => Some(geofence),
            Err(e) => {
                warn!(error = %e, "Dropping invalid geofence");
                None
            }
        })
        .collect();
    if geofences.len() < total {
        debug!(
            kept = geofences.len(),
            dropped = total - geofences.len(),
            "Geofence batch validated"
        );
    }
    geofences
}

/// Parse a JSON array of records and validate it.
///
/// Only a body that is not a JSON array fails. Elements that do not match
/// the record shape are logged and dropped like any other invalid record.
pub fn parse_geofences(json: &str) -> Result<Vec<Geofence>, GeofenceError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let records = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let id = value.get("id").map(|id| id.to_string());
            match serde_json::from_value::<GeofenceRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(index, id = ?id, error = %e, "Dropping malformed geofence record");
                    None
                }
            }
        })
        .collect();
    Ok(into_geofences(records))
}

/// Supplier of the current geofence set.
pub trait GeofenceSource: Send + Sync {
    /// Fetch and validate the full set.
    fn load(&self) -> BoxFuture<'_, Result<Vec<Geofence>, GeofenceError>>;
}

/// Geofence source backed by the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpGeofenceSource {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl HttpGeofenceSource {
    /// Create a source for `{base_url}/geofences?userId={user_id}`.
    pub fn new(
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GeofenceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            user_id: user_id.into(),
        })
    }

    fn url(&self) -> String {
        format!("{}/geofences", self.base_url.trim_end_matches('/'))
    }

    async fn fetch(&self) -> Result<Vec<Geofence>, GeofenceError> {
        let url = self.url();
        debug!(url = %url, user = %self.user_id, "Fetching geofences");
        let response = self
            .client
            .get(&url)
            .query(&[("userId", self.user_id.as_str())])
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        let geofences = parse_geofences(&body)?;
        info!(count = geofences.len(), "Geofences fetched");
        Ok(geofences)
    }
}

impl GeofenceSource for HttpGeofenceSource {
    fn load(&self) -> BoxFuture<'_, Result<Vec<Geofence>, GeofenceError>> {
        Box::pin(self.fetch())
    }
}

/// Geofence source serving a fixed set, optionally from a JSON file.
#[derive(Debug, Clone)]
pub enum StaticGeofenceSource {
    Memory(Vec<Geofence>),
    File(PathBuf),
}

impl StaticGeofenceSource {
    pub fn new(geofences: Vec<Geofence>) -> Self {
        Self::Memory(geofences)
    }

    /// Re-read `path` on every load.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }
}

impl GeofenceSource for StaticGeofenceSource {
    fn load(&self) -> BoxFuture<'_, Result<Vec<Geofence>, GeofenceError>> {
        Box::pin(async move {
            match self {
                Self::Memory(geofences) => Ok(geofences.clone()),
                Self::File(path) => {
                    let json = tokio::fs::read_to_string(path).await?;
                    parse_geofences(&json)
                }
            }
        })
    }
}
