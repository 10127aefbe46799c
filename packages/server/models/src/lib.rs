#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the SafeRoute server.
//!
//! Field names are `snake_case` on the wire, matching what the map frontend
//! sends and expects. Incidents are served as [`ApiIncident`], with a
//! `type`, a `{lat, lng}` location and a `datetime`. Query-string types keep
//! every field optional so that missing parameters surface as a
//! `validation_error` from the handler rather than as a bare
//! deserialization failure.

use chrono::{DateTime, Utc};
use saferoute_hazard::IngestReport;
use saferoute_hazard::feed::SkippedRecord;
use saferoute_hazard::query::{
    Alert, IncidentSummary, ListingResult, NamedCount, NearbyIncident, NearbyResult,
    RealTimeSummary, RecentIncident, RecentResult, SeverityBreakdown,
};
use saferoute_hazard_models::{GeoPoint, Incident, IncidentCategory, RiskLevel, Severity};
use saferoute_risk::RouteSafety;
use saferoute_routing::{ErrorCode, SortOrder};
use serde::{Deserialize, Serialize};

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    /// Human-readable message.
    pub error: String,
    pub code: ErrorCode,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct ApiHealth {
    pub healthy: bool,
    pub version: String,
    pub nodes: usize,
    pub edges: usize,
    pub incidents: usize,
    pub snapshot_version: u64,
    pub risk_available: bool,
    pub last_feed_success: Option<DateTime<Utc>>,
    pub last_feed_error: Option<String>,
}

/// Parameters of the find-path endpoint, as query string or JSON body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindPathRequest {
    pub start_lat: Option<f64>,
    pub start_lon: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lon: Option<f64>,
    /// Lower the server's cap on returned routes.
    pub max_paths: Option<usize>,
    pub sort: Option<SortOrder>,
    /// Never traverse an edge riskier than this.
    pub max_edge_risk: Option<f64>,
    /// Evaluate risk at this instant (RFC 3339) instead of now.
    pub as_of: Option<DateTime<Utc>>,
}

/// Output format of listing endpoints.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

/// `GET /api/crime/nearby`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NearbyParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Meters.
    pub radius: Option<f64>,
    pub hours: Option<i64>,
    /// Overrides `hours` when present.
    pub minutes: Option<i64>,
    pub severity: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /api/crimes/recent`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentParams {
    pub hours: Option<i64>,
    pub limit: Option<usize>,
    pub format: Option<String>,
    pub severity: Option<String>,
    /// Forces a six hour window.
    pub live: Option<bool>,
}

/// `GET /api/crimes/all`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingParams {
    pub limit: Option<usize>,
    /// `YYYY-MM-DD` or RFC 3339.
    pub start_date: Option<String>,
    /// `YYYY-MM-DD` (inclusive) or RFC 3339.
    pub end_date: Option<String>,
    pub crime_type: Option<String>,
    pub category: Option<String>,
    pub district: Option<String>,
    pub format: Option<String>,
}

/// `GET /api/crime/hotspots` and `GET /api/crime/stats`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AreaParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Meters.
    pub radius: Option<f64>,
    pub days: Option<u32>,
}

/// A waypoint in a route-safety request.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ApiWaypoint {
    pub lat: f64,
    #[serde(alias = "lon")]
    pub lng: f64,
}

impl From<ApiWaypoint> for GeoPoint {
    fn from(w: ApiWaypoint) -> Self {
        Self::new(w.lat, w.lng)
    }
}

/// `POST /api/crime/route-safety`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteSafetyRequest {
    #[serde(default)]
    pub waypoints: Vec<ApiWaypoint>,
    pub buffer_meters: Option<f64>,
    pub time_window_hours: Option<i64>,
}

/// A position as the frontend reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ApiLocation {
    pub lat: f64,
    pub lng: f64,
}

impl From<GeoPoint> for ApiLocation {
    fn from(point: GeoPoint) -> Self {
        Self {
            lat: point.lat,
            lng: point.lon,
        }
    }
}

/// An incident on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiIncident {
    pub id: String,
    /// Reported type, or the category name when the feed gave none.
    #[serde(rename = "type")]
    pub crime_type: String,
    pub category: IncidentCategory,
    pub severity: Severity,
    pub location: ApiLocation,
    pub datetime: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl From<&Incident> for ApiIncident {
    fn from(incident: &Incident) -> Self {
        Self {
            id: incident.id.clone(),
            crime_type: incident.type_label(),
            category: incident.category,
            severity: incident.severity,
            location: incident.position.into(),
            datetime: incident.timestamp,
            district: incident.district.clone(),
            address: incident.block_address.clone(),
        }
    }
}

/// A nearby incident with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiNearbyIncident {
    #[serde(flatten)]
    pub incident: ApiIncident,
    pub distance_meters: f64,
}

impl From<&NearbyIncident> for ApiNearbyIncident {
    fn from(nearby: &NearbyIncident) -> Self {
        Self {
            incident: (&nearby.incident).into(),
            distance_meters: nearby.distance_m,
        }
    }
}

/// Response of the nearby endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyResponse {
    pub center: ApiLocation,
    pub radius_meters: f64,
    pub window_minutes: i64,
    /// Matches before the limit was applied.
    pub total_incidents: usize,
    /// Nearest first.
    pub incidents: Vec<ApiNearbyIncident>,
    pub summary: Option<IncidentSummary>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

impl NearbyResponse {
    #[must_use]
    pub fn new(
        center: GeoPoint,
        radius_meters: f64,
        window_minutes: i64,
        result: &NearbyResult,
    ) -> Self {
        Self {
            center: center.into(),
            radius_meters,
            window_minutes,
            total_incidents: result.total,
            incidents: result.incidents.iter().map(ApiNearbyIncident::from).collect(),
            summary: result.summary.clone(),
            risk_score: result.risk_score,
            risk_level: result.risk_level,
        }
    }
}

/// A recent incident with its age.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRecentIncident {
    #[serde(flatten)]
    pub incident: ApiIncident,
    pub minutes_ago: i64,
    pub is_breaking: bool,
}

impl From<&RecentIncident> for ApiRecentIncident {
    fn from(recent: &RecentIncident) -> Self {
        Self {
            incident: (&recent.incident).into(),
            minutes_ago: recent.minutes_ago,
            is_breaking: recent.is_breaking,
        }
    }
}

/// Aggregates shown next to the recent-incident list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRealTimeSummary {
    pub most_recent_crime: Option<ApiRecentIncident>,
    pub crime_types_active: Vec<NamedCount>,
    pub severity_breakdown: SeverityBreakdown,
    pub active_districts: Vec<NamedCount>,
    pub hourly_pattern: [usize; 24],
}

impl From<&RealTimeSummary> for ApiRealTimeSummary {
    fn from(summary: &RealTimeSummary) -> Self {
        Self {
            most_recent_crime: summary.most_recent.as_ref().map(ApiRecentIncident::from),
            crime_types_active: summary.crime_types_active.clone(),
            severity_breakdown: summary.severity_breakdown,
            active_districts: summary.active_districts.clone(),
            hourly_pattern: summary.hourly_pattern,
        }
    }
}

/// JSON response of the recent endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RecentResponse {
    pub hours_back: i64,
    pub live_mode: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Matches before the limit was applied.
    pub total_recent_crimes: usize,
    pub breaking_news_count: usize,
    /// Newest first.
    pub crimes: Vec<ApiRecentIncident>,
    pub real_time_summary: ApiRealTimeSummary,
    pub alerts: Vec<Alert>,
    pub timestamp: DateTime<Utc>,
}

impl RecentResponse {
    #[must_use]
    pub fn new(hours_back: i64, live_mode: bool, result: &RecentResult) -> Self {
        Self {
            hours_back,
            live_mode,
            window_start: result.window_start,
            window_end: result.window_end,
            total_recent_crimes: result.total,
            breaking_news_count: result.breaking_count,
            crimes: result.incidents.iter().map(ApiRecentIncident::from).collect(),
            real_time_summary: (&result.summary).into(),
            alerts: result.alerts.clone(),
            timestamp: result.window_end,
        }
    }
}

/// Response of the route-safety endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSafetyResponse {
    pub route_analysis: RouteSafety,
}

/// JSON response of the bulk listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ListingResponse {
    pub total: usize,
    pub limit: usize,
    #[serde(flatten)]
    pub result: ListingResult,
}

/// Response of `POST /api/incidents`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    #[serde(flatten)]
    pub report: IngestReport,
    /// Records that could not be normalized into incidents.
    pub skipped: Vec<SkippedRecord>,
}
