#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident, severity, and decay-model types for the hazard store.
//!
//! An [`Incident`] is an immutable report with a position, a timestamp, a
//! coarse [`IncidentCategory`] and a [`Severity`]. Its influence on routing
//! is governed by the [`decay::DecayModel`], which turns severity, category
//! and age into a non-negative weight that reaches zero at the configured
//! horizon.

pub mod decay;

use chrono::{DateTime, Utc};
use geo::{BoundingRect, Distance, Haversine, MultiPoint, Point, Rect};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use decay::{CategoryWeights, DecayModel, DistanceDecay, SeverityWeights, TimeDecay};

/// Approximate length of one degree of latitude in meters.
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Severity of an incident.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    /// Homicide, sexual assault, robbery, armed offenses
    High,
    /// Assault, burglary, vehicle crimes
    Medium,
    /// Everything else
    Low,
}

impl Severity {
    /// Returns all variants of this enum, most severe first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::High, Self::Medium, Self::Low]
    }
}

/// Coarse incident category.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum IncidentCategory {
    /// Crimes against persons
    Violent,
    /// Crimes against property
    Property,
    /// Drug and narcotics offenses
    Drug,
    /// Offenses not fitting other categories
    Other,
}

impl IncidentCategory {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Violent, Self::Property, Self::Drug, Self::Other]
    }
}

/// Qualitative band for a normalized `[0, 1]` risk score.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    /// Bands: `>= 0.8` very high, `>= 0.6` high, `>= 0.4` medium,
    /// `>= 0.2` low, otherwise very low.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::VeryHigh
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else if score >= 0.2 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl GeoPoint {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both coordinates are finite and within WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance in meters.
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        Haversine.distance(self.to_point(), other.to_point())
    }

    /// Converts to a `geo` point (x = longitude, y = latitude).
    #[must_use]
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    /// `[lon, lat]`, the coordinate order used by the R-tree indexes.
    #[must_use]
    pub const fn to_xy(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }

    /// `[lat, lon]`, the coordinate order returned to clients.
    #[must_use]
    pub const fn to_lat_lon(&self) -> [f64; 2] {
        [self.lat, self.lon]
    }
}

/// An axis-aligned geographic rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude bound.
    pub west: f64,
    /// Southern latitude bound.
    pub south: f64,
    /// Eastern longitude bound.
    pub east: f64,
    /// Northern latitude bound.
    pub north: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The smallest box containing a circle of `radius_m` around `center`.
    ///
    /// Longitude span is widened by `1 / cos(lat)`; the cosine is clamped so
    /// boxes near the poles stay finite.
    #[must_use]
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let radius_m = radius_m.max(0.0);
        let dlat = radius_m / METERS_PER_DEGREE_LAT;
        let cos_lat = center.lat.to_radians().cos().abs().max(0.01);
        let dlon = radius_m / (METERS_PER_DEGREE_LAT * cos_lat);
        Self::new(
            center.lon - dlon,
            center.lat - dlat,
            center.lon + dlon,
            center.lat + dlat,
        )
    }

    /// Grows the box by `margin_m` meters on every side.
    #[must_use]
    pub fn expand_m(&self, margin_m: f64) -> Self {
        let mid_lat = f64::midpoint(self.south, self.north);
        let dlat = margin_m.max(0.0) / METERS_PER_DEGREE_LAT;
        let cos_lat = mid_lat.to_radians().cos().abs().max(0.01);
        let dlon = margin_m.max(0.0) / (METERS_PER_DEGREE_LAT * cos_lat);
        Self::new(
            self.west - dlon,
            self.south - dlat,
            self.east + dlon,
            self.north + dlat,
        )
    }

    /// A box that covers the whole globe.
    #[must_use]
    pub const fn world() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    /// Box enclosing all of `points`, or `None` when empty.
    #[must_use]
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let points: MultiPoint<f64> = points.into_iter().map(GeoPoint::to_point).collect();
        points.bounding_rect().map(Self::from)
    }

    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.west..=self.east).contains(&point.lon)
            && (self.south..=self.north).contains(&point.lat)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.west, self.south, self.east, self.north]
            .iter()
            .all(|v| v.is_finite())
            && self.west <= self.east
            && self.south <= self.north
    }

    /// Lower corner in `[lon, lat]` order.
    #[must_use]
    pub const fn min_xy(&self) -> [f64; 2] {
        [self.west, self.south]
    }

    /// Upper corner in `[lon, lat]` order.
    #[must_use]
    pub const fn max_xy(&self) -> [f64; 2] {
        [self.east, self.north]
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// A single reported incident.
///
/// Incidents are immutable once ingested and identified by `id`. Their
/// influence is never removed explicitly; it decays to zero over the
/// configured horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Stable identifier assigned by the upstream feed.
    pub id: String,
    /// Where the incident happened.
    pub position: GeoPoint,
    /// When the incident happened.
    pub timestamp: DateTime<Utc>,
    /// Coarse category.
    pub category: IncidentCategory,
    /// Severity.
    pub severity: Severity,
    /// Free-text incident type as reported (e.g. `"Robbery"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crime_type: Option<String>,
    /// Police district or precinct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    /// Block-level address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_address: Option<String>,
    /// Name of the feed that reported the incident.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Incident {
    /// Creates an incident with no descriptive fields.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        position: GeoPoint,
        timestamp: DateTime<Utc>,
        category: IncidentCategory,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            position,
            timestamp,
            category,
            severity,
            crime_type: None,
            district: None,
            block_address: None,
            source: None,
        }
    }

    /// Human-readable type, falling back to the category name.
    #[must_use]
    pub fn type_label(&self) -> String {
        self.crime_type
            .clone()
            .unwrap_or_else(|| self.category.to_string())
    }
}

/// Hazard store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    /// Incidents outside this box are rejected at ingestion. `None` accepts
    /// any valid WGS84 position.
    pub service_region: Option<BoundingBox>,
    /// How far in the future (relative to the ingestion clock) a timestamp
    /// may be before it is rejected.
    pub max_clock_skew_seconds: i64,
    /// Drop incidents older than the retention period when new data arrives.
    pub purge_on_ingest: bool,
    /// How long incidents are kept after they occur. Analytics windows and
    /// historical evaluation instants reach back at most this far.
    pub retention_hours: f64,
    /// Weighting and decay applied to every incident.
    pub decay: DecayModel,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            service_region: None,
            max_clock_skew_seconds: 300,
            purge_on_ingest: true,
            retention_hours: 365.0 * 24.0,
            decay: DecayModel::default(),
        }
    }
}

impl HazardConfig {
    /// The retention period as a `chrono` duration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.retention_hours.max(0.0) * 3_600_000.0) as i64)
    }
}
