#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Multi-objective label-setting search over `(time, risk)`.
//!
//! [`Pathfinder::search`] runs a NAMOA*-style search: every node keeps a
//! set of mutually non-dominated labels instead of a single best distance,
//! the open set is ordered lexicographically by `g + h`, and `h` is an
//! exact single-objective distance to the destination per objective. The
//! result is the full Pareto front of simple paths, optionally capped.
//!
//! Risk is never stored on the graph. It is asked for through
//! [`RiskSource`] the first time an edge is touched and memoized for the
//! rest of the request.

pub mod control;
pub mod cost;
pub mod pareto;

mod bounds;
mod search;

use saferoute_network::RoadEdge;
use saferoute_risk::RiskField;
use serde::{Deserialize, Serialize};

pub use control::{CancelToken, SearchControl};
pub use cost::CostVector;
pub use pareto::{ParetoSet, Path};
pub use search::Pathfinder;

/// Errors that end a search without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// The destination cannot be reached from the origin.
    #[error("No route from node {from} to node {to}")]
    NoRoute { from: u64, to: u64 },

    /// The search was stopped before it finished.
    #[error("Search stopped: {0}")]
    Timeout(TimeoutReason),
}

/// Why a search was stopped early.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum TimeoutReason {
    Deadline,
    Cancelled,
    ExpansionBudget,
}

/// Search tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on the number of returned paths.
    pub max_paths: usize,
    /// Labels expanded before the search gives up; `None` is unbounded.
    pub max_expansions: Option<usize>,
    /// Relative tolerance under which two path costs count as equal.
    pub dedupe_epsilon: f64,
    /// Equal-cost paths sharing at least this fraction of edges are
    /// collapsed into the first one found.
    pub overlap_ratio: f64,
    /// Edges riskier than this are never traversed.
    pub max_edge_risk: Option<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_paths: 8,
            max_expansions: Some(2_000_000),
            dedupe_epsilon: 1e-3,
            overlap_ratio: 0.9,
            max_edge_risk: None,
        }
    }
}

/// Anything that can price the danger of traversing an edge.
///
/// Implementations must be deterministic for the lifetime of a search and
/// return non-negative values; negative or non-finite values are treated
/// as zero.
pub trait RiskSource {
    fn edge_risk(&self, edge: &RoadEdge) -> f64;
}

impl RiskSource for RiskField {
    fn edge_risk(&self, edge: &RoadEdge) -> f64 {
        Self::edge_risk(self, edge)
    }
}

/// Zero risk everywhere; turns the search into a time-only shortest path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRisk;

impl RiskSource for NoRisk {
    fn edge_risk(&self, _edge: &RoadEdge) -> f64 {
        0.0
    }
}
