//! Safety analysis of an arbitrary waypoint route.
//!
//! Unlike [`RiskField::edge_risk`], which feeds the pathfinder, this scores
//! a route the way a person reads it: how many incidents lie near each leg,
//! a normalized `[0, 1]` score per leg and overall, clusters of incidents
//! and a plain-language recommendation.

use std::collections::HashMap;

use chrono::Duration;
use saferoute_hazard::assessment::{
    HighRiskArea, area_risk_score, high_risk_areas, route_recommendation,
};
use saferoute_hazard_models::{BoundingBox, GeoPoint, Incident, RiskLevel, Severity};
use serde::Serialize;

use crate::RiskField;
use crate::geometry::{distance_to_line_m, line_string};

/// Legs scoring above this are listed as high-risk segments.
pub const HIGH_RISK_SEGMENT_SCORE: f64 = 0.7;

/// An overall score above this suggests looking for another route.
pub const ALTERNATIVE_ROUTE_SCORE: f64 = 0.8;

/// Parameters of a route-safety analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSafetyQuery {
    pub waypoints: Vec<GeoPoint>,
    /// Incidents within this distance of a leg count against it.
    pub buffer_m: f64,
    /// Only incidents reported within this window before the evaluation
    /// instant are considered.
    pub window: Duration,
}

/// Analysis of one leg between consecutive waypoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSafety {
    /// 1-based leg number.
    pub segment: usize,
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub incident_count: usize,
    pub risk_score: f64,
    pub high_risk_areas: Vec<HighRiskArea>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSafety {
    /// Distinct incidents near any leg.
    pub total_incidents: usize,
    pub overall_risk_score: f64,
    pub overall_risk_level: RiskLevel,
    pub recommendation: &'static str,
    pub segments: Vec<SegmentSafety>,
    /// Legs scoring above [`HIGH_RISK_SEGMENT_SCORE`].
    pub high_risk_segments: Vec<SegmentSafety>,
    pub alternative_route_suggested: bool,
}

impl RiskField {
    /// Scores every leg of `query.waypoints` and the route as a whole.
    ///
    /// An incident near two legs counts once toward the overall score, at
    /// its smallest distance. Fewer than two waypoints yield an empty,
    /// zero-risk analysis.
    #[must_use]
    pub fn route_safety(&self, query: &RouteSafetyQuery) -> RouteSafety {
        let since = self.as_of() - query.window;
        let mut route: HashMap<&str, (&Incident, f64)> = HashMap::new();
        let mut segments = Vec::with_capacity(query.waypoints.len().saturating_sub(1));

        for (i, leg) in query.waypoints.windows(2).enumerate() {
            let line = line_string(leg);
            let mut near: Vec<(&Incident, f64)> = match BoundingBox::enclosing(leg) {
                Some(bounds) => self
                    .snapshot()
                    .within(bounds.expand_m(query.buffer_m))
                    .filter(|incident| {
                        incident.timestamp >= since && incident.timestamp <= self.as_of()
                    })
                    .map(|incident| (incident, distance_to_line_m(incident.position, &line)))
                    .filter(|(_, distance)| *distance <= query.buffer_m)
                    .collect(),
                None => Vec::new(),
            };
            near.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));

            for &(incident, distance) in &near {
                route
                    .entry(incident.id.as_str())
                    .and_modify(|entry| entry.1 = entry.1.min(distance))
                    .or_insert((incident, distance));
            }

            let scored: Vec<(Severity, f64)> =
                near.iter().map(|(inc, d)| (inc.severity, *d)).collect();
            let members: Vec<&Incident> = near.iter().map(|(inc, _)| *inc).collect();
            segments.push(SegmentSafety {
                segment: i + 1,
                start: leg[0],
                end: leg[1],
                incident_count: near.len(),
                risk_score: area_risk_score(&scored, query.buffer_m),
                high_risk_areas: high_risk_areas(&members),
            });
        }

        let scored: Vec<(Severity, f64)> = route
            .values()
            .map(|(incident, distance)| (incident.severity, *distance))
            .collect();
        let overall_risk_score = area_risk_score(&scored, query.buffer_m);
        let overall_risk_level = RiskLevel::from_score(overall_risk_score);
        let high_risk_segments = segments
            .iter()
            .filter(|s| s.risk_score > HIGH_RISK_SEGMENT_SCORE)
            .cloned()
            .collect();

        log::debug!(
            "Route safety over {} legs: {} incidents, score {overall_risk_score}",
            segments.len(),
            route.len()
        );

        RouteSafety {
            total_incidents: route.len(),
            overall_risk_score,
            overall_risk_level,
            recommendation: route_recommendation(overall_risk_level),
            segments,
            high_risk_segments,
            alternative_route_suggested: overall_risk_score > ALTERNATIVE_ROUTE_SCORE,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use saferoute_hazard::HazardSnapshot;

    use super::*;
    use crate::RiskConfig;
    use crate::test_support::{decay, incident, now};

    fn field() -> RiskField {
        let incidents = vec![
            // near the corner shared by both legs
            incident("corner", GeoPoint::new(40.0101, -75.0), 1, Severity::High),
            incident("leg1", GeoPoint::new(40.005, -75.0001), 2, Severity::Medium),
            incident("leg2a", GeoPoint::new(40.0101, -74.995), 3, Severity::High),
            incident("leg2b", GeoPoint::new(40.0099, -74.9951), 3, Severity::High),
            incident("far", GeoPoint::new(40.05, -75.05), 1, Severity::High),
            incident("stale", GeoPoint::new(40.005, -75.0), 48, Severity::High),
        ];
        let snapshot = HazardSnapshot::from_incidents(decay(), incidents);
        RiskField::new(Arc::new(snapshot), now(), RiskConfig::default())
    }

    fn query() -> RouteSafetyQuery {
        RouteSafetyQuery {
            waypoints: vec![
                GeoPoint::new(40.0, -75.0),
                GeoPoint::new(40.01, -75.0),
                GeoPoint::new(40.01, -74.99),
            ],
            buffer_m: 100.0,
            window: Duration::hours(24),
        }
    }

    #[test]
    fn counts_each_incident_once_per_route() {
        let analysis = field().route_safety(&query());
        assert_eq!(analysis.segments.len(), 2);
        assert_eq!(analysis.segments[0].incident_count, 2, "corner + leg1");
        assert_eq!(analysis.segments[1].incident_count, 3, "corner + leg2a + leg2b");
        assert_eq!(analysis.total_incidents, 4);
        assert!(analysis.overall_risk_score > 0.0 && analysis.overall_risk_score <= 1.0);
    }

    #[test]
    fn clusters_close_incidents() {
        let analysis = field().route_safety(&query());
        let areas = &analysis.segments[1].high_risk_areas;
        assert_eq!(areas.len(), 1, "{areas:?}");
        assert_eq!(areas[0].incident_count, 2);
        assert_eq!(areas[0].high_severity_count, 2);
    }

    #[test]
    fn single_waypoint_is_empty() {
        let analysis = field().route_safety(&RouteSafetyQuery {
            waypoints: vec![GeoPoint::new(40.0, -75.0)],
            ..query()
        });
        assert!(analysis.segments.is_empty());
        assert_eq!(analysis.total_incidents, 0);
        assert_eq!(analysis.overall_risk_level, RiskLevel::VeryLow);
        assert!(!analysis.alternative_route_suggested);
    }
}
