#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Stateless safety routing.
//!
//! [`RoutingService::find_path`] validates and snaps the endpoints, takes
//! one hazard snapshot, binds a risk field to it and runs the Pareto
//! search. The service holds only shared, read-mostly state (`Arc`s to the
//! network and the hazard store), so any number of requests may run in
//! parallel.

pub mod error;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use saferoute_hazard::HazardStore;
use saferoute_hazard_models::GeoPoint;
use saferoute_network::RoadNetwork;
use saferoute_pathfinder::{NoRisk, ParetoSet, Path, Pathfinder, SearchControl};
use saferoute_risk::{RiskConfig, RiskField, RouteSafety, RouteSafetyQuery};
use serde::{Deserialize, Serialize};

pub use error::{ErrorCode, RoutingError};
pub use saferoute_pathfinder::{CancelToken, SearchConfig};

/// Largest buffer accepted for route-safety analysis.
pub const MAX_SAFETY_BUFFER_M: f64 = 10_000.0;

/// Longest window accepted for route-safety analysis.
pub const MAX_SAFETY_WINDOW_HOURS: i64 = 168;

/// Routing tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Wall-clock limit for one search.
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub search: SearchConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            search: SearchConfig::default(),
        }
    }
}

/// Order in which routes are returned.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SortOrder {
    /// Ascending time, ties by risk.
    #[default]
    Time,
    /// Ascending risk, ties by time.
    Risk,
    /// Ascending balanced score.
    Balanced,
}

/// Role a route plays within its set.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PathLabel {
    Fastest,
    Safest,
    Balanced,
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Lower the configured cap on returned routes.
    pub max_paths: Option<usize>,
    pub sort: SortOrder,
    /// Refuse edges riskier than this.
    pub max_edge_risk: Option<f64>,
    /// Evaluate risk as of this instant instead of now.
    pub as_of: Option<DateTime<Utc>>,
    pub cancel: Option<CancelToken>,
}

/// One route of a [`RouteSet`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedPath {
    /// `[lat, lon]` pairs in travel order.
    pub path_coordinates: Vec<[f64; 2]>,
    /// Seconds.
    pub time: f64,
    pub risk: f64,
    pub length_meters: f64,
    pub node_ids: Vec<u64>,
    pub labels: Vec<PathLabel>,
}

/// The answer to a routing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSet {
    pub paths: Vec<RoutedPath>,
    /// `false` when the hazard feed is down and routes ignore risk.
    pub risk_available: bool,
    /// `true` when the configured cap dropped Pareto-optimal routes.
    pub truncated: bool,
    pub origin_node: u64,
    pub destination_node: u64,
    pub as_of: DateTime<Utc>,
    /// Hazard snapshot the risks were computed on.
    pub snapshot_version: u64,
}

/// Request-scoped routing over a shared network and hazard store.
#[derive(Debug, Clone)]
pub struct RoutingService {
    network: Arc<RoadNetwork>,
    hazards: Arc<HazardStore>,
    risk: RiskConfig,
    config: RoutingConfig,
}

impl RoutingService {
    #[must_use]
    pub const fn new(
        network: Arc<RoadNetwork>,
        hazards: Arc<HazardStore>,
        risk: RiskConfig,
        config: RoutingConfig,
    ) -> Self {
        Self {
            network,
            hazards,
            risk,
            config,
        }
    }

    #[must_use]
    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    #[must_use]
    pub fn hazards(&self) -> &HazardStore {
        &self.hazards
    }

    /// A second owner of the hazard store, for background maintenance.
    #[must_use]
    pub fn shared_hazards(&self) -> Arc<HazardStore> {
        Arc::clone(&self.hazards)
    }

    #[must_use]
    pub const fn config(&self) -> &RoutingConfig {
        &self.config
    }

    #[must_use]
    pub const fn risk_config(&self) -> &RiskConfig {
        &self.risk
    }

    /// A risk field over the current snapshot at `as_of`.
    #[must_use]
    pub fn risk_field(&self, as_of: DateTime<Utc>) -> RiskField {
        RiskField::new(self.hazards.snapshot(), as_of, self.risk)
    }

    /// Pareto-optimal routes between two positions.
    ///
    /// When the hazard feed is marked unavailable the search runs on time
    /// alone and the result is flagged `risk_available = false` rather than
    /// failing.
    ///
    /// # Errors
    ///
    /// * [`RoutingError::Validation`] for invalid coordinates or options
    /// * [`RoutingError::OutOfCoverage`] if an endpoint cannot be snapped
    /// * [`RoutingError::NoRoute`] if the endpoints are not connected
    /// * [`RoutingError::Timeout`] if the search exceeds its budget or is
    ///   cancelled
    pub fn find_path(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        options: &RouteOptions,
    ) -> Result<RouteSet, RoutingError> {
        validate_position("origin", origin)?;
        validate_position("destination", destination)?;
        let search_config = self.search_config(options)?;

        let from = self.network.nearest_node(origin)?;
        let to = self.network.nearest_node(destination)?;

        let as_of = options.as_of.unwrap_or_else(Utc::now);
        let snapshot = self.hazards.snapshot();
        snapshot.ensure_retained(as_of - snapshot.decay().horizon())?;
        let snapshot_version = snapshot.version();
        let risk_available = self.hazards.risk_available();

        let mut control = SearchControl::default()
            .with_deadline(Instant::now() + Duration::from_millis(self.config.timeout_ms));
        control.cancel.clone_from(&options.cancel);

        let set = if risk_available {
            let field = RiskField::new(snapshot, as_of, self.risk);
            Pathfinder::new(&self.network, &field, search_config).search(from, to, &control)?
        } else {
            log::warn!("Hazard feed unavailable; routing on travel time only");
            let time_only = SearchConfig {
                max_edge_risk: None,
                ..search_config
            };
            Pathfinder::new(&self.network, &NoRisk, time_only).search(from, to, &control)?
        };

        log::info!(
            "Routed {} -> {}: {} paths (truncated: {}, risk available: {risk_available})",
            self.network.node(from).id,
            self.network.node(to).id,
            set.len(),
            set.truncated
        );

        Ok(RouteSet {
            paths: annotate(&set, options.sort, risk_available),
            risk_available,
            truncated: set.truncated,
            origin_node: self.network.node(from).id,
            destination_node: self.network.node(to).id,
            as_of,
            snapshot_version,
        })
    }

    fn search_config(&self, options: &RouteOptions) -> Result<SearchConfig, RoutingError> {
        let mut config = self.config.search;
        if let Some(max_paths) = options.max_paths {
            if max_paths == 0 {
                return Err(RoutingError::validation("max_paths must be at least 1"));
            }
            config.max_paths = max_paths.min(config.max_paths);
        }
        if let Some(limit) = options.max_edge_risk {
            if !limit.is_finite() || limit < 0.0 {
                return Err(RoutingError::validation(
                    "max_edge_risk must be a non-negative number",
                ));
            }
            config.max_edge_risk = Some(limit);
        }
        Ok(config)
    }

    /// Safety analysis of a waypoint route.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Validation`] for fewer than two waypoints,
    /// invalid coordinates, a buffer or window out of range, or a window
    /// reaching back past the retained incident history.
    pub fn analyze_route(
        &self,
        waypoints: &[GeoPoint],
        buffer_m: f64,
        window_hours: i64,
        as_of: DateTime<Utc>,
    ) -> Result<RouteSafety, RoutingError> {
        if waypoints.len() < 2 {
            return Err(RoutingError::validation("at least 2 waypoints required"));
        }
        for (i, point) in waypoints.iter().enumerate() {
            validate_position(&format!("waypoint {i}"), *point)?;
        }
        if !(buffer_m > 0.0 && buffer_m <= MAX_SAFETY_BUFFER_M) {
            return Err(RoutingError::validation(format!(
                "buffer_meters must be in (0, {MAX_SAFETY_BUFFER_M}]"
            )));
        }
        if !(1..=MAX_SAFETY_WINDOW_HOURS).contains(&window_hours) {
            return Err(RoutingError::validation(format!(
                "time_window_hours must be between 1 and {MAX_SAFETY_WINDOW_HOURS}"
            )));
        }

        let window = chrono::Duration::hours(window_hours);
        let field = self.risk_field(as_of);
        field.snapshot().ensure_retained(as_of - window)?;
        Ok(field.route_safety(&RouteSafetyQuery {
            waypoints: waypoints.to_vec(),
            buffer_m,
            window,
        }))
    }
}

fn validate_position(what: &str, position: GeoPoint) -> Result<(), RoutingError> {
    if position.is_valid() {
        Ok(())
    } else {
        Err(RoutingError::validation(format!(
            "{what} ({}, {}) is not a valid WGS84 coordinate",
            position.lat, position.lon
        )))
    }
}

/// Orders the set and attaches coordinates and labels.
fn annotate(set: &ParetoSet, sort: SortOrder, risk_available: bool) -> Vec<RoutedPath> {
    let fastest = set.fastest().map(|p| p.discovery);
    let safest = set.safest().map(|p| p.discovery);
    let balanced = set.balanced().map(|p| p.discovery);
    let scores = set.balanced_scores();

    let mut order: Vec<usize> = (0..set.len()).collect();
    match sort {
        SortOrder::Time => {}
        SortOrder::Risk => order.sort_by(|&a, &b| {
            let (pa, pb) = (&set.paths[a], &set.paths[b]);
            pa.cost
                .risk
                .total_cmp(&pb.cost.risk)
                .then_with(|| pa.cost.time.total_cmp(&pb.cost.time))
                .then_with(|| pa.discovery.cmp(&pb.discovery))
        }),
        SortOrder::Balanced => order.sort_by(|&a, &b| {
            scores[a]
                .total_cmp(&scores[b])
                .then_with(|| set.paths[a].discovery.cmp(&set.paths[b].discovery))
        }),
    }

    order
        .into_iter()
        .map(|i| {
            let path: &Path = &set.paths[i];
            let mut labels = Vec::new();
            if fastest == Some(path.discovery) {
                labels.push(PathLabel::Fastest);
            }
            if risk_available {
                if safest == Some(path.discovery) {
                    labels.push(PathLabel::Safest);
                }
                if balanced == Some(path.discovery) && set.len() > 1 {
                    labels.push(PathLabel::Balanced);
                }
            }
            RoutedPath {
                path_coordinates: path.geometry.iter().map(GeoPoint::to_lat_lon).collect(),
                time: path.cost.time,
                risk: path.cost.risk,
                length_meters: path.length_m,
                node_ids: path.node_ids.clone(),
                labels,
            }
        })
        .collect()
}
