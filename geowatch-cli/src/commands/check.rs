//! Check command - test a coordinate against the configured geofences.

use std::path::PathBuf;

use clap::Args;
use console::style;

use geowatch::geo::{haversine_meters, LatLng};
use geowatch::geofence::{Geofence, GeofenceShape};

use super::common::{geofence_source, load_config};
use crate::error::CliError;

/// Arguments for the check command.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lng: f64,

    /// JSON geofence file (overrides the [geofence] config section)
    #[arg(long)]
    pub geofences: Option<PathBuf>,
}

/// One row of the check report.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub id: String,
    pub name: String,
    pub kind: &'static str,
    pub inside: bool,
    /// Distance to the center, for circles.
    pub center_distance_m: Option<f64>,
}

/// Evaluate `point` against every active geofence.
pub fn evaluate(point: LatLng, geofences: &[Geofence]) -> Vec<CheckResult> {
    geofences
        .iter()
        .filter(|g| g.is_active)
        .map(|g| CheckResult {
            id: g.id.clone(),
            name: g.name.clone(),
            kind: g.shape.kind(),
            inside: g.contains(point),
            center_distance_m: match &g.shape {
                GeofenceShape::Circle { center, .. } => Some(haversine_meters(point, *center)),
                GeofenceShape::Polygon(_) => None,
            },
        })
        .collect()
}

/// Run the check command.
pub async fn run(args: CheckArgs, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let point = LatLng::new(args.lat, args.lng);
    if !point.is_valid() {
        return Err(CliError::Config(format!(
            "({}, {}) is not a valid coordinate",
            args.lat, args.lng
        )));
    }

    let config = load_config(config_path.as_deref())?;
    let source = geofence_source(args.geofences.as_deref(), &config)?.ok_or_else(|| {
        CliError::Config(
            "No geofences configured. Pass --geofences <file> or set [geofence] \
             endpoint or file in config.ini"
                .to_string(),
        )
    })?;
    let geofences = source.load().await?;
    let results = evaluate(point, &geofences);

    println!("Position {}", point);
    if results.is_empty() {
        println!("  (no active geofences)");
        return Ok(());
    }

    for result in &results {
        let state = if result.inside {
            style("inside ").green()
        } else {
            style("outside").dim()
        };
        let distance = result
            .center_distance_m
            .map(|d| format!("  {:.0} m from center", d))
            .unwrap_or_default();
        println!(
            "  {}  {} [{}] ({}){}",
            state, result.name, result.id, result.kind, distance
        );
    }

    let inside = results.iter().filter(|r| r.inside).count();
    println!();
    println!("Inside {} of {} active geofences", inside, results.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fences() -> Vec<Geofence> {
        let square = GeofenceShape::polygon(
            "square",
            vec![
                LatLng::new(0.0, 0.0),
                LatLng::new(0.0, 2.0),
                LatLng::new(2.0, 2.0),
                LatLng::new(2.0, 0.0),
            ],
        )
        .unwrap();
        let circle = GeofenceShape::circle("gate", LatLng::new(1.0, 1.0), 500.0).unwrap();
        vec![
            Geofence::new("square", "Square", square),
            Geofence::new("gate", "Gate", circle.clone()),
            Geofence::new("old", "Old", circle).with_active(false),
        ]
    }

    #[test]
    fn test_evaluate_skips_inactive() {
        let results = evaluate(LatLng::new(1.0, 1.0), &fences());
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["square", "gate"]);
        assert!(results.iter().all(|r| r.inside));
    }

    #[test]
    fn test_evaluate_reports_circle_distance() {
        let results = evaluate(LatLng::new(1.5, 1.0), &fences());
        assert!(results[0].inside);
        assert!(!results[1].inside);
        assert!(results[0].center_distance_m.is_none());
        let distance = results[1].center_distance_m.unwrap();
        assert!((distance - 55_597.0).abs() < 100.0, "got {}", distance);
    }
}
