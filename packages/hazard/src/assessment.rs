//! Normalized `[0, 1]` risk assessment for an area or a set of incidents.
//!
//! This is the client-facing "how risky is it around here" score. It
//! combines incident density with a severity- and distance-weighted term
//! and is independent of the decay-weighted risk field used for routing.

use saferoute_hazard_models::{GeoPoint, Incident, RiskLevel, Severity};
use serde::Serialize;

/// Radius within which incidents are grouped into one high-risk area.
pub const CLUSTER_RADIUS_M: f64 = 100.0;

const fn severity_points(severity: Severity) -> f64 {
    match severity {
        Severity::High => 3.0,
        Severity::Medium => 2.0,
        Severity::Low => 1.0,
    }
}

/// Scores incidents found within `radius_m` of a point.
///
/// Each element pairs an incident's severity with its distance from the
/// query point. Returns 0 for an empty set; the result is rounded to three
/// decimals and never exceeds 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn area_risk_score(incidents: &[(Severity, f64)], radius_m: f64) -> f64 {
    if incidents.is_empty() || radius_m <= 0.0 {
        return 0.0;
    }
    let count = incidents.len() as f64;
    let radius_km = radius_m / 1000.0;
    let density = count / (std::f64::consts::PI * radius_km * radius_km);
    let base = (density / 100.0).min(0.5);

    let weighted: f64 = incidents
        .iter()
        .map(|(severity, distance)| {
            severity_points(*severity) * (1.0 - distance / radius_m).max(0.1)
        })
        .sum::<f64>()
        / (count * 3.0);

    let score = f64::midpoint(base, weighted).min(1.0);
    (score * 1000.0).round() / 1000.0
}

/// Advice shown alongside a route's overall score.
#[must_use]
pub const fn route_recommendation(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::VeryHigh => "High risk route - strongly recommend finding alternative",
        RiskLevel::High => "Moderate risk - consider alternative route if available",
        RiskLevel::Medium => "Some risk present - exercise normal caution",
        RiskLevel::Low | RiskLevel::VeryLow => "Low risk route - safe to proceed",
    }
}

/// A group of at least two incidents within [`CLUSTER_RADIUS_M`] of a seed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighRiskArea {
    /// Mean position of the clustered incidents.
    pub location: GeoPoint,
    pub incident_count: usize,
    pub high_severity_count: usize,
    pub radius_meters: f64,
}

/// Greedy single-pass clustering: each unassigned incident seeds a cluster
/// and absorbs every later unassigned incident within the radius.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn high_risk_areas(incidents: &[&Incident]) -> Vec<HighRiskArea> {
    let mut assigned = vec![false; incidents.len()];
    let mut areas = Vec::new();

    for (i, seed) in incidents.iter().enumerate() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut members = vec![*seed];

        for (j, other) in incidents.iter().enumerate().skip(i + 1) {
            if !assigned[j] && seed.position.distance_m(&other.position) <= CLUSTER_RADIUS_M {
                assigned[j] = true;
                members.push(*other);
            }
        }

        if members.len() >= 2 {
            let n = members.len() as f64;
            let lat = members.iter().map(|m| m.position.lat).sum::<f64>() / n;
            let lon = members.iter().map(|m| m.position.lon).sum::<f64>() / n;
            areas.push(HighRiskArea {
                location: GeoPoint::new(lat, lon),
                incident_count: members.len(),
                high_severity_count: members
                    .iter()
                    .filter(|m| m.severity == Severity::High)
                    .count(),
                radius_meters: CLUSTER_RADIUS_M,
            });
        }
    }

    areas
}
