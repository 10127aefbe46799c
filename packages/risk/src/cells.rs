//! Grid aggregation of the risk field into hazard cells and hotspots.

use std::collections::BTreeMap;

use chrono::Duration;
use saferoute_hazard::assessment::area_risk_score;
use saferoute_hazard_models::{
    BoundingBox, GeoPoint, Incident, METERS_PER_DEGREE_LAT, RiskLevel, Severity,
};
use serde::Serialize;

use crate::RiskField;

/// Cells scoring at or below this are not reported as hotspots.
pub const HOTSPOT_MIN_SCORE: f64 = 0.3;

/// Maximum number of hotspots returned.
pub const MAX_HOTSPOTS: usize = 20;

/// Aggregated risk for one square of a grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardCell {
    pub center: GeoPoint,
    pub bounds: BoundingBox,
    pub cell_size_meters: f64,
    /// Incidents falling inside the cell.
    pub incident_count: usize,
    /// Decay-weighted sum, tapered by distance from the cell center over one
    /// cell size.
    pub risk: f64,
    /// Normalized `[0, 1]` area score of the cell's incidents.
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

/// A regular grid anchored at the south-west corner of a region.
struct Grid {
    origin: GeoPoint,
    dlat: f64,
    dlon: f64,
    cell_size_m: f64,
}

impl Grid {
    fn new(region: &BoundingBox, cell_size_m: f64) -> Self {
        let mid_lat = f64::midpoint(region.south, region.north);
        let cos_lat = mid_lat.to_radians().cos().abs().max(0.01);
        Self {
            origin: GeoPoint::new(region.south, region.west),
            dlat: cell_size_m / METERS_PER_DEGREE_LAT,
            dlon: cell_size_m / (METERS_PER_DEGREE_LAT * cos_lat),
            cell_size_m,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn key(&self, point: &GeoPoint) -> (i64, i64) {
        (
            ((point.lat - self.origin.lat) / self.dlat).floor() as i64,
            ((point.lon - self.origin.lon) / self.dlon).floor() as i64,
        )
    }

    #[allow(clippy::cast_precision_loss)]
    fn bounds(&self, (row, col): (i64, i64)) -> BoundingBox {
        let south = (row as f64).mul_add(self.dlat, self.origin.lat);
        let west = (col as f64).mul_add(self.dlon, self.origin.lon);
        BoundingBox::new(west, south, west + self.dlon, south + self.dlat)
    }
}

impl RiskField {
    /// Hazard cells of `cell_size_m` covering `region`, highest risk first.
    ///
    /// Only cells that contain at least one significant incident are
    /// returned. Ties are broken by score and then by grid position so the
    /// order is stable.
    #[must_use]
    pub fn hazard_cells(&self, region: BoundingBox, cell_size_m: f64) -> Vec<HazardCell> {
        let incidents = self
            .snapshot()
            .query(region, self.as_of())
            .filter(|i| region.contains(&i.position));
        self.aggregate(&region, cell_size_m, incidents)
    }

    fn aggregate<'a>(
        &self,
        region: &BoundingBox,
        cell_size_m: f64,
        incidents: impl Iterator<Item = &'a Incident>,
    ) -> Vec<HazardCell> {
        if cell_size_m <= 0.0 || !region.is_valid() {
            return Vec::new();
        }
        let grid = Grid::new(region, cell_size_m);
        let mut buckets: BTreeMap<(i64, i64), Vec<&Incident>> = BTreeMap::new();
        for incident in incidents {
            buckets.entry(grid.key(&incident.position)).or_default().push(incident);
        }

        let decay = self.snapshot().decay();
        let taper = self.config().distance_decay;
        let mut cells: Vec<((i64, i64), HazardCell)> = buckets
            .into_iter()
            .map(|(key, members)| {
                let bounds = grid.bounds(key);
                let center = GeoPoint::new(
                    f64::midpoint(bounds.south, bounds.north),
                    f64::midpoint(bounds.west, bounds.east),
                );
                let mut risk = 0.0;
                let mut scored: Vec<(Severity, f64)> = Vec::with_capacity(members.len());
                for incident in &members {
                    let distance = center.distance_m(&incident.position);
                    risk += decay.incident_weight(incident, self.as_of())
                        * taper.factor(distance, grid.cell_size_m);
                    scored.push((incident.severity, distance));
                }
                let risk_score = area_risk_score(&scored, grid.cell_size_m / 2.0);
                let cell = HazardCell {
                    center,
                    bounds,
                    cell_size_meters: grid.cell_size_m,
                    incident_count: members.len(),
                    risk,
                    risk_score,
                    risk_level: RiskLevel::from_score(risk_score),
                };
                (key, cell)
            })
            .collect();

        cells.sort_by(|(ka, a), (kb, b)| {
            b.risk
                .total_cmp(&a.risk)
                .then_with(|| b.risk_score.total_cmp(&a.risk_score))
                .then_with(|| ka.cmp(kb))
        });
        cells.into_iter().map(|(_, cell)| cell).collect()
    }

    /// Hotspots around `query.center`: the highest-risk cells among
    /// incidents reported within the query window.
    ///
    /// Every incident in the window counts, including ones past the decay
    /// horizon; those contribute to the cell score but not to its risk.
    #[must_use]
    pub fn hotspots(&self, query: &HotspotQuery) -> HotspotReport {
        let region = BoundingBox::around(query.center, query.radius_m);
        let as_of = self.as_of();
        let since = as_of - query.window;
        let incidents: Vec<&Incident> = self
            .snapshot()
            .within(region)
            .filter(|i| i.timestamp >= since && i.timestamp <= as_of)
            .filter(|i| query.center.distance_m(&i.position) <= query.radius_m)
            .collect();

        let mut hotspots: Vec<HazardCell> = self
            .aggregate(&region, query.cell_size_m, incidents.iter().copied())
            .into_iter()
            .filter(|cell| cell.risk_score > HOTSPOT_MIN_SCORE)
            .collect();
        hotspots.truncate(MAX_HOTSPOTS);

        log::debug!(
            "Found {} hotspots among {} incidents within {} m",
            hotspots.len(),
            incidents.len(),
            query.radius_m
        );

        HotspotReport {
            center: query.center,
            radius_meters: query.radius_m,
            period_days: query.window.num_days(),
            total_incidents: incidents.len(),
            hotspots,
        }
    }
}

/// Parameters of a hotspot search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotspotQuery {
    pub center: GeoPoint,
    pub radius_m: f64,
    pub window: Duration,
    pub cell_size_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotReport {
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub period_days: i64,
    pub total_incidents: usize,
    pub hotspots: Vec<HazardCell>,
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
            incident("a", GeoPoint::new(40.0001, -75.0001), 1, Severity::High),
            incident("b", GeoPoint::new(40.0002, -75.0002), 2, Severity::High),
            incident("c", GeoPoint::new(40.0003, -75.0001), 3, Severity::Medium),
            incident("d", GeoPoint::new(40.0100, -75.0100), 1, Severity::Low),
            incident("old", GeoPoint::new(40.0001, -75.0001), 500, Severity::High),
        ];
        let snapshot = HazardSnapshot::from_incidents(decay(), incidents);
        RiskField::new(Arc::new(snapshot), now(), RiskConfig::default())
    }

    #[test]
    fn cells_are_ordered_by_risk() {
        let region = BoundingBox::new(-75.02, 39.99, -74.99, 40.02);
        let cells = field().hazard_cells(region, 200.0);
        assert_eq!(cells.len(), 2, "{cells:?}");
        assert_eq!(cells[0].incident_count, 3);
        assert_eq!(cells[1].incident_count, 1);
        assert!(cells[0].risk > cells[1].risk);
        assert!(cells.iter().all(|c| c.bounds.contains(&c.center)));
    }

    #[test]
    fn expired_incidents_are_not_aggregated() {
        let region = BoundingBox::new(-75.02, 39.99, -74.99, 40.02);
        let total: usize = field()
            .hazard_cells(region, 200.0)
            .iter()
            .map(|c| c.incident_count)
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn hotspots_respect_window_and_score() {
        let report = field().hotspots(&HotspotQuery {
            center: GeoPoint::new(40.0, -75.0),
            // an odd number of half cells puts the center mid-cell
            radius_m: 2100.0,
            window: Duration::hours(2),
            cell_size_m: 200.0,
        });
        // "c" is outside the two-hour window.
        assert_eq!(report.total_incidents, 3);
        assert!(!report.hotspots.is_empty());
        assert!(report.hotspots.iter().all(|h| h.risk_score > HOTSPOT_MIN_SCORE));
        assert_eq!(report.period_days, 0);
    }

    #[test]
    fn degenerate_cell_size_yields_nothing() {
        let region = BoundingBox::new(-75.02, 39.99, -74.99, 40.02);
        assert!(field().hazard_cells(region, 0.0).is_empty());
    }

    #[test]
    fn hotspots_reach_back_past_the_decay_horizon() {
        let spot = GeoPoint::new(40.0001, -75.0001);
        let incidents = (0..5).map(|k| incident(&format!("m{k}"), spot, 240, Severity::High));
        let snapshot = HazardSnapshot::from_incidents(decay(), incidents);
        let field = RiskField::new(Arc::new(snapshot), now(), RiskConfig::default());

        let month = HotspotQuery {
            center: GeoPoint::new(40.0, -75.0),
            radius_m: 1100.0,
            window: Duration::days(30),
            cell_size_m: 200.0,
        };
        let report = field.hotspots(&month);
        assert_eq!(report.period_days, 30);
        assert_eq!(report.total_incidents, 5);
        assert_eq!(report.hotspots.len(), 1);
        assert!(report.hotspots[0].risk.abs() < f64::EPSILON);

        let week = field.hotspots(&HotspotQuery {
            window: Duration::days(7),
            ..month
        });
        assert_eq!(week.total_incidents, 0);
    }
}
