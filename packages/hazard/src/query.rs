//! Proximity and recency queries over a [`HazardSnapshot`].
//!
//! These serve proximity alerting and the incident listing endpoints. They
//! never touch the road network.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use saferoute_hazard_models::{
    BoundingBox, GeoPoint, Incident, IncidentCategory, RiskLevel, Severity,
};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};

use crate::HazardSnapshot;
use crate::assessment::area_risk_score;

/// Incidents newer than this are flagged as breaking.
pub const BREAKING_MINUTES: i64 = 60;

/// Counts of incidents per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityBreakdown {
    pub const fn add(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    #[must_use]
    pub fn from_incidents<'a>(incidents: impl IntoIterator<Item = &'a Incident>) -> Self {
        let mut breakdown = Self::default();
        for incident in incidents {
            breakdown.add(incident.severity);
        }
        breakdown
    }
}

/// A label with the number of incidents carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
    pub name: String,
    pub count: usize,
}

/// Counts incidents by `key`, most frequent first (ties by name). Incidents
/// for which `key` returns `None` are not counted.
pub fn count_by<'a, F>(incidents: impl IntoIterator<Item = &'a Incident>, key: F) -> Vec<NamedCount>
where
    F: Fn(&Incident) -> Option<String>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for incident in incidents {
        if let Some(name) = key(incident) {
            *counts.entry(name).or_default() += 1;
        }
    }
    let mut counted: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect();
    counted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    counted
}

/// Incidents per hour of day (UTC).
#[must_use]
pub fn hourly_pattern<'a>(incidents: impl IntoIterator<Item = &'a Incident>) -> [usize; 24] {
    let mut hours = [0; 24];
    for incident in incidents {
        hours[incident.timestamp.hour() as usize] += 1;
    }
    hours
}

// ── Nearby ──────────────────────────────────────────────────────────

/// Parameters of a proximity query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyQuery {
    pub center: GeoPoint,
    pub radius_m: f64,
    /// Only incidents within this long before `as_of` are returned.
    pub window: Duration,
    pub severity: Option<Severity>,
    /// Maximum number of incidents listed; the total is always reported.
    pub limit: usize,
}

/// An incident annotated with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyIncident {
    pub incident: Incident,
    pub distance_m: f64,
}

/// Headline figures for a set of incidents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncidentSummary {
    pub most_common_type: String,
    pub most_common_count: usize,
    pub severity_breakdown: SeverityBreakdown,
    pub recent_high_severity: bool,
}

impl IncidentSummary {
    /// `None` for an empty set.
    #[must_use]
    pub fn of<'a>(incidents: impl IntoIterator<Item = &'a Incident> + Clone) -> Option<Self> {
        let types = count_by(incidents.clone(), |i| Some(i.type_label()));
        let most_common = types.into_iter().next()?;
        let severity_breakdown = SeverityBreakdown::from_incidents(incidents);
        Some(Self {
            most_common_type: most_common.name,
            most_common_count: most_common.count,
            recent_high_severity: severity_breakdown.high > 0,
            severity_breakdown,
        })
    }
}

/// Result of [`nearby`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyResult {
    /// Number of matching incidents before `limit` is applied.
    pub total: usize,
    /// Nearest first.
    pub incidents: Vec<NearbyIncident>,
    pub summary: Option<IncidentSummary>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

/// Incidents within `query.radius_m` of `query.center` reported during the
/// window ending at `as_of`.
#[must_use]
pub fn nearby(
    snapshot: &HazardSnapshot,
    query: &NearbyQuery,
    as_of: DateTime<Utc>,
) -> NearbyResult {
    let since = as_of - query.window;
    let region = BoundingBox::around(query.center, query.radius_m);

    let mut matches: Vec<NearbyIncident> = snapshot
        .within(region)
        .filter(|i| i.timestamp >= since && i.timestamp <= as_of)
        .filter(|i| query.severity.is_none_or(|s| i.severity == s))
        .filter_map(|i| {
            let distance_m = query.center.distance_m(&i.position);
            (distance_m <= query.radius_m).then(|| NearbyIncident {
                incident: i.clone(),
                distance_m,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| b.incident.timestamp.cmp(&a.incident.timestamp))
            .then_with(|| a.incident.id.cmp(&b.incident.id))
    });

    let scored: Vec<(Severity, f64)> = matches
        .iter()
        .map(|m| (m.incident.severity, m.distance_m))
        .collect();
    let risk_score = area_risk_score(&scored, query.radius_m);
    let summary = IncidentSummary::of(matches.iter().map(|m| &m.incident));
    let total = matches.len();
    matches.truncate(query.limit);

    NearbyResult {
        total,
        incidents: matches,
        summary,
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
    }
}

// ── Recent ──────────────────────────────────────────────────────────

/// Parameters of a recency query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecentQuery {
    pub window: Duration,
    pub limit: usize,
    pub severity: Option<Severity>,
    /// Restrict to a region; `None` covers the whole store.
    pub region: Option<BoundingBox>,
}

/// An incident annotated with how long ago it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentIncident {
    pub incident: Incident,
    pub minutes_ago: i64,
    pub is_breaking: bool,
}

impl RecentIncident {
    #[must_use]
    pub fn new(incident: Incident, as_of: DateTime<Utc>) -> Self {
        let minutes_ago = (as_of - incident.timestamp).num_minutes();
        Self {
            incident,
            minutes_ago,
            is_breaking: minutes_ago < BREAKING_MINUTES,
        }
    }
}

/// Aggregates over the incidents of a recency query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealTimeSummary {
    pub most_recent: Option<RecentIncident>,
    pub crime_types_active: Vec<NamedCount>,
    pub severity_breakdown: SeverityBreakdown,
    pub active_districts: Vec<NamedCount>,
    pub hourly_pattern: [usize; 24],
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertKind {
    /// Incidents reported within the last hour
    Breaking,
    /// Many high-severity incidents in the window
    Cluster,
    /// One district dominating recent reports
    Hotspot,
}

/// A real-time alert derived from recent activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
}

/// Result of [`recent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentResult {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Number of matching incidents before `limit` is applied.
    pub total: usize,
    pub breaking_count: usize,
    /// Newest first.
    pub incidents: Vec<RecentIncident>,
    pub summary: RealTimeSummary,
    pub alerts: Vec<Alert>,
}

/// Incidents reported during the window ending at `as_of`, newest first.
#[must_use]
pub fn recent(
    snapshot: &HazardSnapshot,
    query: &RecentQuery,
    as_of: DateTime<Utc>,
) -> RecentResult {
    let since = as_of - query.window;
    let region = query.region.unwrap_or_else(BoundingBox::world);

    let mut matches: Vec<&Incident> = snapshot
        .within(region)
        .filter(|i| i.timestamp >= since && i.timestamp <= as_of)
        .filter(|i| query.severity.is_none_or(|s| i.severity == s))
        .collect();
    matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    let total = matches.len();
    matches.truncate(query.limit);

    let incidents: Vec<RecentIncident> = matches
        .into_iter()
        .map(|i| RecentIncident::new(i.clone(), as_of))
        .collect();
    let listed = || incidents.iter().map(|r| &r.incident);

    let summary = RealTimeSummary {
        most_recent: incidents.first().cloned(),
        crime_types_active: count_by(listed(), |i| Some(i.type_label())),
        severity_breakdown: SeverityBreakdown::from_incidents(listed()),
        active_districts: count_by(listed(), |i| i.district.clone()),
        hourly_pattern: hourly_pattern(listed()),
    };
    let alerts = real_time_alerts(&incidents, &summary);

    RecentResult {
        window_start: since,
        window_end: as_of,
        total,
        breaking_count: incidents.iter().filter(|r| r.is_breaking).count(),
        incidents,
        summary,
        alerts,
    }
}

/// Breaking activity (medium, high above three incidents), more than five
/// high-severity incidents, and any district with more than ten incidents.
#[must_use]
pub fn real_time_alerts(incidents: &[RecentIncident], summary: &RealTimeSummary) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let breaking = incidents.iter().filter(|r| r.is_breaking).count();
    if breaking > 0 {
        alerts.push(Alert {
            kind: AlertKind::Breaking,
            message: format!("{breaking} incidents reported in the last hour"),
            severity: if breaking > 3 {
                Severity::High
            } else {
                Severity::Medium
            },
        });
    }

    let high = summary.severity_breakdown.high;
    if high > 5 {
        alerts.push(Alert {
            kind: AlertKind::Cluster,
            message: format!("{high} high-severity incidents in recent period"),
            severity: Severity::High,
        });
    }

    if let Some(top) = summary.active_districts.first()
        && top.count > 10
    {
        alerts.push(Alert {
            kind: AlertKind::Hotspot,
            message: format!("District {} has {} recent incidents", top.name, top.count),
            severity: Severity::Medium,
        });
    }

    alerts
}

// ── Bulk listing ────────────────────────────────────────────────────

/// Filters for a bulk listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingQuery {
    pub limit: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the incident type.
    pub crime_type: Option<String>,
    pub category: Option<IncidentCategory>,
    pub district: Option<String>,
}

/// Aggregates over a bulk listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingSummary {
    pub crime_types: Vec<NamedCount>,
    pub districts: Vec<NamedCount>,
    pub severity_breakdown: SeverityBreakdown,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Result of [`listing`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingResult {
    /// Newest first.
    pub incidents: Vec<Incident>,
    pub summary: ListingSummary,
}

/// All stored incidents matching `query`, newest first, capped at
/// `query.limit`.
#[must_use]
pub fn listing(snapshot: &HazardSnapshot, query: &ListingQuery) -> ListingResult {
    let type_needle = query.crime_type.as_deref().map(str::to_lowercase);

    let mut matches: Vec<&Incident> = snapshot
        .iter()
        .filter(|i| query.start.is_none_or(|start| i.timestamp >= start))
        .filter(|i| query.end.is_none_or(|end| i.timestamp <= end))
        .filter(|i| query.category.is_none_or(|c| i.category == c))
        .filter(|i| {
            query
                .district
                .as_deref()
                .is_none_or(|d| i.district.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(d)))
        })
        .filter(|i| {
            type_needle
                .as_deref()
                .is_none_or(|needle| i.type_label().to_lowercase().contains(needle))
        })
        .collect();
    matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    matches.truncate(query.limit);

    let summary = ListingSummary {
        crime_types: count_by(matches.iter().copied(), |i| Some(i.type_label())),
        districts: count_by(matches.iter().copied(), |i| i.district.clone()),
        severity_breakdown: SeverityBreakdown::from_incidents(matches.iter().copied()),
        earliest: matches.iter().map(|i| i.timestamp).min(),
        latest: matches.iter().map(|i| i.timestamp).max(),
    };

    ListingResult {
        incidents: matches.into_iter().cloned().collect(),
        summary,
    }
}

// ── Statistics ──────────────────────────────────────────────────────

/// Descriptive statistics for the area around a point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaStatistics {
    pub center: GeoPoint,
    pub radius_m: f64,
    pub period_days: u32,
    pub total_incidents: usize,
    pub crime_types: Vec<NamedCount>,
    pub severity_breakdown: SeverityBreakdown,
    pub hourly_distribution: [usize; 24],
    /// Rounded to two decimals.
    pub incidents_per_day: f64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

/// Statistics over the `days` before `as_of` within `radius_m` of `center`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn statistics(
    snapshot: &HazardSnapshot,
    center: GeoPoint,
    radius_m: f64,
    days: u32,
    as_of: DateTime<Utc>,
) -> AreaStatistics {
    let result = nearby(
        snapshot,
        &NearbyQuery {
            center,
            radius_m,
            window: Duration::days(i64::from(days)),
            severity: None,
            limit: usize::MAX,
        },
        as_of,
    );
    let incidents = || result.incidents.iter().map(|n| &n.incident);
    let per_day = if days == 0 {
        0.0
    } else {
        result.total as f64 / f64::from(days)
    };

    AreaStatistics {
        center,
        radius_m,
        period_days: days,
        total_incidents: result.total,
        crime_types: count_by(incidents(), |i| Some(i.type_label())),
        severity_breakdown: SeverityBreakdown::from_incidents(incidents()),
        hourly_distribution: hourly_pattern(incidents()),
        incidents_per_day: (per_day * 100.0).round() / 100.0,
        risk_score: result.risk_score,
        risk_level: result.risk_level,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use saferoute_hazard_models::DecayModel;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn incident(id: &str, lat: f64, minutes_ago: i64, severity: Severity) -> Incident {
        let mut incident = Incident::new(
            id,
            GeoPoint::new(lat, -87.63),
            now() - Duration::minutes(minutes_ago),
            IncidentCategory::Violent,
            severity,
        );
        incident.crime_type = Some("Robbery".to_string());
        incident
    }

    fn snapshot(incidents: Vec<Incident>) -> HazardSnapshot {
        HazardSnapshot::from_incidents(DecayModel::default(), incidents)
    }

    #[test]
    fn nearby_filters_by_radius_window_and_severity() {
        let snap = snapshot(vec![
            incident("close", 41.8800, 30, Severity::High),
            incident("mid", 41.8830, 90, Severity::Low),
            incident("far", 41.9500, 30, Severity::High),
            incident("old", 41.8800, 60 * 48, Severity::High),
        ]);
        let query = NearbyQuery {
            center: GeoPoint::new(41.88, -87.63),
            radius_m: 1000.0,
            window: Duration::hours(24),
            severity: None,
            limit: 50,
        };

        let result = nearby(&snap, &query, now());
        let ids: Vec<&str> = result.incidents.iter().map(|n| n.incident.id.as_str()).collect();
        assert_eq!(ids, vec!["close", "mid"]);
        assert_eq!(result.total, 2);
        assert!(result.risk_score > 0.0);

        let summary = result.summary.unwrap();
        assert_eq!(summary.most_common_type, "Robbery");
        assert_eq!(summary.severity_breakdown.high, 1);
        assert!(summary.recent_high_severity);

        let high_only = nearby(
            &snap,
            &NearbyQuery {
                severity: Some(Severity::High),
                ..query
            },
            now(),
        );
        assert_eq!(high_only.total, 1);
    }

    #[test]
    fn nearby_limit_keeps_total() {
        let snap = snapshot(
            (0..5)
                .map(|i| incident(&format!("i{i}"), 41.88, 10, Severity::Low))
                .collect(),
        );
        let result = nearby(
            &snap,
            &NearbyQuery {
                center: GeoPoint::new(41.88, -87.63),
                radius_m: 100.0,
                window: Duration::hours(1),
                severity: None,
                limit: 2,
            },
            now(),
        );
        assert_eq!(result.total, 5);
        assert_eq!(result.incidents.len(), 2);
    }

    #[test]
    fn empty_nearby_has_no_summary() {
        let result = nearby(
            &snapshot(Vec::new()),
            &NearbyQuery {
                center: GeoPoint::new(41.88, -87.63),
                radius_m: 100.0,
                window: Duration::hours(1),
                severity: None,
                limit: 10,
            },
            now(),
        );
        assert_eq!(result.total, 0);
        assert!(result.summary.is_none());
        assert_eq!(result.risk_level, RiskLevel::VeryLow);
    }

    #[test]
    fn recent_orders_newest_first_and_flags_breaking() {
        let snap = snapshot(vec![
            incident("older", 41.88, 120, Severity::Low),
            incident("newest", 41.88, 5, Severity::High),
            incident("outside-window", 41.88, 60 * 30, Severity::High),
        ]);
        let result = recent(
            &snap,
            &RecentQuery {
                window: Duration::hours(24),
                limit: 100,
                severity: None,
                region: None,
            },
            now(),
        );
        assert_eq!(result.total, 2);
        assert_eq!(result.incidents[0].incident.id, "newest");
        assert!(result.incidents[0].is_breaking);
        assert_eq!(result.incidents[0].minutes_ago, 5);
        assert!(!result.incidents[1].is_breaking);
        assert_eq!(result.breaking_count, 1);
        assert_eq!(
            result.summary.most_recent.as_ref().map(|r| r.incident.id.as_str()),
            Some("newest")
        );
        assert_eq!(result.summary.hourly_pattern.iter().sum::<usize>(), 2);
        assert_eq!(result.alerts.len(), 1);
        assert_eq!(result.alerts[0].kind, AlertKind::Breaking);
        assert_eq!(result.alerts[0].severity, Severity::Medium);
    }

    #[test]
    fn alerts_for_clusters_and_hotspots() {
        let incidents: Vec<RecentIncident> = (0..12)
            .map(|i| {
                let mut incident = incident(&format!("d{i}"), 41.88, 180, Severity::High);
                incident.district = Some("12".to_string());
                RecentIncident::new(incident, now())
            })
            .collect();
        let listed: Vec<&Incident> = incidents.iter().map(|r| &r.incident).collect();
        let summary = RealTimeSummary {
            most_recent: None,
            crime_types_active: Vec::new(),
            severity_breakdown: SeverityBreakdown::from_incidents(listed.iter().copied()),
            active_districts: count_by(listed.iter().copied(), |i| i.district.clone()),
            hourly_pattern: [0; 24],
        };

        let kinds: Vec<AlertKind> = real_time_alerts(&incidents, &summary)
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(kinds, vec![AlertKind::Cluster, AlertKind::Hotspot]);
    }

    #[test]
    fn listing_applies_filters() {
        let mut theft = incident("theft", 41.88, 60 * 24 * 3, Severity::Low);
        theft.crime_type = Some("Theft".to_string());
        theft.category = IncidentCategory::Property;
        theft.district = Some("3".to_string());
        let snap = snapshot(vec![
            theft,
            incident("robbery", 41.88, 60, Severity::High),
        ]);

        let all = listing(
            &snap,
            &ListingQuery {
                limit: 10,
                ..ListingQuery::default()
            },
        );
        assert_eq!(all.incidents.len(), 2);
        assert_eq!(all.incidents[0].id, "robbery");
        assert_eq!(all.summary.earliest, Some(now() - Duration::days(3)));

        let thefts = listing(
            &snap,
            &ListingQuery {
                limit: 10,
                crime_type: Some("THEFT".to_string()),
                ..ListingQuery::default()
            },
        );
        assert_eq!(thefts.incidents.len(), 1);
        assert_eq!(thefts.summary.districts[0].name, "3");

        let recent_only = listing(
            &snap,
            &ListingQuery {
                limit: 10,
                start: Some(now() - Duration::days(1)),
                ..ListingQuery::default()
            },
        );
        assert_eq!(recent_only.incidents.len(), 1);
    }

    #[test]
    fn statistics_counts_per_day() {
        let snap = snapshot(vec![
            incident("a", 41.88, 60, Severity::High),
            incident("b", 41.88, 60 * 24 * 2, Severity::Medium),
            incident("c", 41.88, 60 * 24 * 40, Severity::Low),
        ]);
        let stats = statistics(&snap, GeoPoint::new(41.88, -87.63), 500.0, 30, now());
        assert_eq!(stats.total_incidents, 2);
        assert!((stats.incidents_per_day - 0.07).abs() < 1e-9);
        assert_eq!(stats.severity_breakdown.medium, 1);
        assert_eq!(stats.crime_types[0].count, 2);
    }

    #[test]
    fn count_by_orders_by_frequency_then_name() {
        let incidents = [
            incident("1", 41.88, 1, Severity::Low),
            incident("2", 41.88, 1, Severity::Low),
        ];
        let mut other = incident("3", 41.88, 1, Severity::Low);
        other.crime_type = Some("Assault".to_string());
        let all: Vec<&Incident> = incidents.iter().chain(std::iter::once(&other)).collect();
        let counts = count_by(all.iter().copied(), |i| Some(i.type_label()));
        assert_eq!(counts[0], NamedCount { name: "Robbery".into(), count: 2 });
        assert_eq!(counts[1].name, "Assault");
    }
}
