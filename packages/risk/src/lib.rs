#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Decay-weighted risk field over a hazard snapshot.
//!
//! A [`RiskField`] binds one [`HazardSnapshot`] to one evaluation instant.
//! Every value it produces is a pure function of the edge or point asked
//! about, the snapshot contents and that instant; nothing is cached inside
//! the field, so the same inputs always give the same answer.
//!
//! For an incident `i` at distance `d` from a polyline the contribution is
//!
//! ```text
//! severityWeight(i) * categoryWeight(i) * timeDecay(asOf - t_i) * distanceDecay(d)
//! ```
//!
//! and an edge's risk is the sum over every incident inside the buffer,
//! plus `lightingWeight * darkness` for poorly lit streets.

pub mod cells;
pub mod geometry;
pub mod safety;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use saferoute_hazard::HazardSnapshot;
use saferoute_hazard_models::{BoundingBox, DistanceDecay, GeoPoint};
use saferoute_network::RoadEdge;
use serde::{Deserialize, Serialize};

pub use cells::{HazardCell, HotspotQuery, HotspotReport};
pub use geometry::{distance_to_line_m, distance_to_polyline_m};
pub use safety::{RouteSafety, RouteSafetyQuery, SegmentSafety};

/// Tunables for the risk field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Incidents farther than this from a polyline contribute nothing.
    pub buffer_radius_m: f64,
    pub distance_decay: DistanceDecay,
    /// Default edge length of a hazard-cell grid square.
    pub cell_size_m: f64,
    /// Risk added per unit of edge darkness; zero ignores lighting.
    pub lighting_weight: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            buffer_radius_m: 100.0,
            distance_decay: DistanceDecay::Linear,
            cell_size_m: 200.0,
            lighting_weight: 0.0,
        }
    }
}

/// Risk evaluator bound to a snapshot and an instant.
#[derive(Debug, Clone)]
pub struct RiskField {
    snapshot: Arc<HazardSnapshot>,
    as_of: DateTime<Utc>,
    config: RiskConfig,
}

impl RiskField {
    #[must_use]
    pub const fn new(
        snapshot: Arc<HazardSnapshot>,
        as_of: DateTime<Utc>,
        config: RiskConfig,
    ) -> Self {
        Self {
            snapshot,
            as_of,
            config,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &HazardSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub const fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    #[must_use]
    pub const fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Risk of traversing `edge`. Zero when no incident is in range and
    /// the street is lit.
    #[must_use]
    pub fn edge_risk(&self, edge: &RoadEdge) -> f64 {
        self.config
            .lighting_weight
            .mul_add(edge.darkness, self.polyline_risk(&edge.geometry))
    }

    /// Risk accumulated along an arbitrary polyline.
    ///
    /// Each incident is counted once, at its minimum distance to the line.
    #[must_use]
    pub fn polyline_risk(&self, polyline: &[GeoPoint]) -> f64 {
        let radius = self.config.buffer_radius_m;
        if radius <= 0.0 {
            return 0.0;
        }
        let Some(bounds) = BoundingBox::enclosing(polyline) else {
            return 0.0;
        };

        let line = geometry::line_string(polyline);
        let decay = self.snapshot.decay();
        self.snapshot
            .query(bounds.expand_m(radius), self.as_of)
            .map(|incident| {
                let distance = distance_to_line_m(incident.position, &line);
                decay.incident_weight(incident, self.as_of)
                    * self.config.distance_decay.factor(distance, radius)
            })
            .sum()
    }

    /// Risk at a single point, with the same buffer and taper as edges.
    #[must_use]
    pub fn point_risk(&self, position: GeoPoint) -> f64 {
        self.polyline_risk(std::slice::from_ref(&position))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use saferoute_hazard_models::{DecayModel, GeoPoint, Incident, IncidentCategory, Severity};

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    pub fn incident(
        id: &str,
        position: GeoPoint,
        hours_ago: i64,
        severity: Severity,
    ) -> Incident {
        Incident::new(
            id,
            position,
            now() - Duration::hours(hours_ago),
            IncidentCategory::Violent,
            severity,
        )
    }

    pub fn decay() -> DecayModel {
        DecayModel::default()
    }
}

#[cfg(test)]
mod tests {
    use saferoute_hazard_models::Severity;

    use super::test_support::{decay, incident, now};
    use super::*;

    fn street() -> RoadEdge {
        RoadEdge {
            from: 1,
            to: 2,
            travel_time_s: 60.0,
            length_m: 111.0,
            geometry: vec![GeoPoint::new(40.0, -75.0), GeoPoint::new(40.001, -75.0)],
            darkness: 0.0,
        }
    }

    fn field_with(incidents: Vec<saferoute_hazard_models::Incident>) -> RiskField {
        let snapshot = HazardSnapshot::from_incidents(decay(), incidents);
        RiskField::new(Arc::new(snapshot), now(), RiskConfig::default())
    }

    /// Shifts a point `meters` east.
    fn east_of(point: GeoPoint, meters: f64) -> GeoPoint {
        let dlon = meters
            / (saferoute_hazard_models::METERS_PER_DEGREE_LAT * point.lat.to_radians().cos());
        GeoPoint::new(point.lat, point.lon + dlon)
    }

    #[test]
    fn empty_snapshot_has_zero_risk() {
        let field = field_with(vec![]);
        assert!(field.edge_risk(&street()).abs() < f64::EPSILON);
    }

    #[test]
    fn incident_on_edge_now_contributes_full_weight() {
        let on_edge = GeoPoint::new(40.0005, -75.0);
        let field = field_with(vec![incident("a", on_edge, 0, Severity::High)]);
        let risk = field.edge_risk(&street());
        assert!((risk - 1.0).abs() < 1e-6, "risk {risk}");
    }

    #[test]
    fn high_severity_outweighs_low() {
        let on_edge = GeoPoint::new(40.0005, -75.0);
        let high = field_with(vec![incident("a", on_edge, 0, Severity::High)]);
        let low = field_with(vec![incident("a", on_edge, 0, Severity::Low)]);
        let (h, l) = (high.edge_risk(&street()), low.edge_risk(&street()));
        assert!(h > l, "high {h} should exceed low {l}");
        assert!(l > 0.0);
    }

    #[test]
    fn risk_does_not_increase_with_age() {
        let on_edge = GeoPoint::new(40.0005, -75.0);
        let mut previous = f64::INFINITY;
        for hours in [0, 1, 12, 48, 100, 167, 168, 400] {
            let field = field_with(vec![incident("a", on_edge, hours, Severity::Medium)]);
            let risk = field.edge_risk(&street());
            assert!(risk >= 0.0);
            assert!(risk <= previous, "risk rose at age {hours}h: {risk} > {previous}");
            previous = risk;
        }
        assert!(previous.abs() < f64::EPSILON, "past the horizon risk must be zero");
    }

    #[test]
    fn risk_does_not_increase_with_distance() {
        let base = GeoPoint::new(40.0005, -75.0);
        let mut previous = f64::INFINITY;
        for meters in [0.0, 10.0, 25.0, 50.0, 75.0, 99.0, 100.0, 150.0] {
            let field = field_with(vec![incident("a", east_of(base, meters), 2, Severity::High)]);
            let risk = field.edge_risk(&street());
            assert!(risk <= previous, "risk rose at {meters} m: {risk} > {previous}");
            previous = risk;
        }
        assert!(previous.abs() < f64::EPSILON, "outside the buffer risk must be zero");
    }

    #[test]
    fn future_incidents_do_not_count() {
        let on_edge = GeoPoint::new(40.0005, -75.0);
        let field = field_with(vec![incident("a", on_edge, -2, Severity::High)]);
        assert!(field.edge_risk(&street()).abs() < f64::EPSILON);
    }

    #[test]
    fn risk_is_repeatable() {
        let field = field_with(vec![
            incident("a", GeoPoint::new(40.0002, -75.0001), 3, Severity::High),
            incident("b", GeoPoint::new(40.0008, -74.9999), 30, Severity::Low),
        ]);
        let first = field.edge_risk(&street());
        assert!(first > 0.0);
        for _ in 0..5 {
            assert!((field.edge_risk(&street()) - first).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn point_risk_matches_single_point_polyline() {
        let here = GeoPoint::new(40.0, -75.0);
        let field = field_with(vec![incident("a", east_of(here, 50.0), 0, Severity::High)]);
        let risk = field.point_risk(here);
        assert!((risk - 0.5).abs() < 0.01, "risk {risk}");
    }

    #[test]
    fn dark_streets_carry_lighting_risk() {
        let dark = RoadEdge {
            darkness: 0.75,
            ..street()
        };
        let unweighted = field_with(vec![]);
        assert!(unweighted.edge_risk(&dark).abs() < f64::EPSILON);

        let config = RiskConfig {
            lighting_weight: 2.0,
            ..RiskConfig::default()
        };
        let on_edge = GeoPoint::new(40.0005, -75.0);
        let snapshot = HazardSnapshot::from_incidents(
            decay(),
            vec![incident("a", on_edge, 0, Severity::High)],
        );
        let field = RiskField::new(Arc::new(snapshot), now(), config);
        assert!((field.edge_risk(&dark) - 2.5).abs() < 1e-6);
        assert!((field.edge_risk(&street()) - 1.0).abs() < 1e-6);
    }
}
