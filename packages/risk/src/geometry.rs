//! Point-to-polyline distances on the sphere.

use geo::{Closest, Distance, Haversine, HaversineClosestPoint, LineString};
use saferoute_hazard_models::GeoPoint;

/// `polyline` as a `geo` line string in `(lon, lat)` order.
#[must_use]
pub fn line_string(polyline: &[GeoPoint]) -> LineString<f64> {
    polyline.iter().map(|p| (p.lon, p.lat)).collect()
}

/// Minimum great-circle distance in meters from `point` to `line`.
///
/// A single-point line degenerates to a point distance; an empty one is
/// infinitely far away.
#[must_use]
pub fn distance_to_line_m(point: GeoPoint, line: &LineString<f64>) -> f64 {
    let from = point.to_point();
    match line.haversine_closest_point(&from) {
        Closest::Intersection(_) => 0.0,
        Closest::SinglePoint(closest) => Haversine.distance(from, closest),
        Closest::Indeterminate => line
            .points()
            .map(|vertex| Haversine.distance(from, vertex))
            .fold(f64::INFINITY, f64::min),
    }
}

/// [`distance_to_line_m`] for a slice of positions.
#[must_use]
pub fn distance_to_polyline_m(point: GeoPoint, polyline: &[GeoPoint]) -> f64 {
    distance_to_line_m(point, &line_string(polyline))
}
