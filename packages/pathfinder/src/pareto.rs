//! Complete paths and the Pareto set they form.

use std::collections::HashSet;

use petgraph::graph::{EdgeIndex, NodeIndex};
use saferoute_hazard_models::GeoPoint;

use crate::SearchConfig;
use crate::cost::CostVector;

/// One origin-to-destination path.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    /// Graph indices of the visited nodes, origin first.
    pub nodes: Vec<NodeIndex>,
    /// External ids of the visited nodes.
    pub node_ids: Vec<u64>,
    pub edges: Vec<EdgeIndex>,
    /// Sum of the edges' `(travel time, risk)`.
    pub cost: CostVector,
    pub length_m: f64,
    /// Ordered coordinates from origin to destination.
    pub geometry: Vec<GeoPoint>,
    /// Order in which the search settled this path; lower was found first.
    pub discovery: u64,
}

impl Path {
    /// Fraction of edges shared with `other`, relative to the longer path.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn overlap(&self, other: &Self) -> f64 {
        let longest = self.edges.len().max(other.edges.len());
        if longest == 0 {
            return 1.0;
        }
        let mine: HashSet<EdgeIndex> = self.edges.iter().copied().collect();
        let shared = other.edges.iter().filter(|e| mine.contains(e)).count();
        shared as f64 / longest as f64
    }
}

/// Mutually non-dominated paths, ordered by ascending time, then risk, then
/// discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ParetoSet {
    pub paths: Vec<Path>,
    /// Set when the configured maximum size dropped paths.
    pub truncated: bool,
}

impl ParetoSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter()
    }

    /// Lowest time, ties by risk.
    #[must_use]
    pub fn fastest(&self) -> Option<&Path> {
        self.paths.iter().min_by(|a, b| by_time(a, b))
    }

    /// Lowest risk, ties by time.
    #[must_use]
    pub fn safest(&self) -> Option<&Path> {
        self.paths.iter().min_by(|a, b| by_risk(a, b))
    }

    /// Distance of each path from the ideal point after scaling both
    /// objectives to `[0, 1]` across the set; lower is better balanced.
    #[must_use]
    pub fn balanced_scores(&self) -> Vec<f64> {
        balanced_scores(&self.paths)
    }

    /// The path with the lowest balanced score.
    ///
    /// When several paths share that score, the earliest-discovered one that
    /// is neither the fastest nor the safest wins. If every tied path is one
    /// of those two, there is no balanced path.
    #[must_use]
    pub fn balanced(&self) -> Option<&Path> {
        let scores = self.balanced_scores();
        let best = scores.iter().copied().min_by(f64::total_cmp)?;
        let tied: Vec<&Path> = self
            .paths
            .iter()
            .zip(&scores)
            .filter(|(_, score)| score.total_cmp(&best).is_eq())
            .map(|(path, _)| path)
            .collect();
        if let [only] = tied.as_slice() {
            return Some(*only);
        }

        let fastest = self.fastest().map(|p| p.discovery);
        let safest = self.safest().map(|p| p.discovery);
        tied.into_iter()
            .filter(|p| Some(p.discovery) != fastest && Some(p.discovery) != safest)
            .min_by_key(|p| p.discovery)
    }

    /// Builds the final set from settled destination paths: drops dominated
    /// and duplicate paths, applies the size cap and orders the result.
    pub(crate) fn from_candidates(mut candidates: Vec<Path>, config: &SearchConfig) -> Self {
        candidates.sort_by_key(|p| p.discovery);

        let mut paths: Vec<Path> = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if candidates.iter().any(|other| other.cost.dominates(&candidate.cost)) {
                continue;
            }
            let duplicate = paths.iter().any(|kept| {
                kept.cost.approx_eq(&candidate.cost, config.dedupe_epsilon)
                    && kept.overlap(candidate) >= config.overlap_ratio
            });
            if !duplicate {
                paths.push(candidate.clone());
            }
        }

        let cap = config.max_paths.max(1);
        let truncated = paths.len() > cap;
        if truncated {
            log::debug!("Truncating Pareto set from {} to {cap} paths", paths.len());
            paths = keep_representatives(paths, cap);
        }

        paths.sort_by(|a, b| by_time(a, b));
        Self { paths, truncated }
    }
}

fn by_time(a: &Path, b: &Path) -> std::cmp::Ordering {
    a.cost
        .lexicographic(&b.cost)
        .then_with(|| a.discovery.cmp(&b.discovery))
}

fn by_risk(a: &Path, b: &Path) -> std::cmp::Ordering {
    a.cost
        .risk
        .total_cmp(&b.cost.risk)
        .then_with(|| a.cost.time.total_cmp(&b.cost.time))
        .then_with(|| a.discovery.cmp(&b.discovery))
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// `hypot` of each path's min-max normalized time and risk.
fn balanced_scores(paths: &[Path]) -> Vec<f64> {
    let (tmin, tmax) = min_max(paths.iter().map(|p| p.cost.time));
    let (rmin, rmax) = min_max(paths.iter().map(|p| p.cost.risk));
    let norm = |v: f64, lo: f64, hi: f64| if hi > lo { (v - lo) / (hi - lo) } else { 0.0 };

    paths
        .iter()
        .map(|p| norm(p.cost.time, tmin, tmax).hypot(norm(p.cost.risk, rmin, rmax)))
        .collect()
}

/// Keeps the fastest and the safest path, then fills up to `cap` with the
/// best balanced scores. Deterministic for a given input.
fn keep_representatives(paths: Vec<Path>, cap: usize) -> Vec<Path> {
    let scores = balanced_scores(&paths);
    let mut order: Vec<usize> = (0..paths.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .total_cmp(&scores[b])
            .then_with(|| paths[a].discovery.cmp(&paths[b].discovery))
    });

    let fastest = (0..paths.len()).min_by(|&a, &b| by_time(&paths[a], &paths[b]));
    let safest = (0..paths.len()).min_by(|&a, &b| by_risk(&paths[a], &paths[b]));

    let mut keep: Vec<usize> = Vec::with_capacity(cap);
    for index in fastest.into_iter().chain(safest).chain(order) {
        if keep.len() == cap {
            break;
        }
        if !keep.contains(&index) {
            keep.push(index);
        }
    }

    let mut slots: Vec<Option<Path>> = paths.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}
