//! Two-objective cost vectors and dominance.

use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Tolerance for floating-point noise in dominance checks.
pub const DOMINANCE_EPSILON: f64 = 1e-9;

/// Accumulated `(time, risk)` of a partial or complete path.
///
/// Never scalarized during search; the two components are compared
/// separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostVector {
    /// Seconds.
    pub time: f64,
    pub risk: f64,
}

impl CostVector {
    pub const ZERO: Self = Self {
        time: 0.0,
        risk: 0.0,
    };

    #[must_use]
    pub const fn new(time: f64, risk: f64) -> Self {
        Self { time, risk }
    }

    /// `self` is no worse than `other` in both objectives.
    #[must_use]
    pub fn weakly_dominates(&self, other: &Self) -> bool {
        self.time <= other.time + DOMINANCE_EPSILON && self.risk <= other.risk + DOMINANCE_EPSILON
    }

    /// `self` is no worse in both objectives and strictly better in one.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.weakly_dominates(other)
            && (self.time < other.time - DOMINANCE_EPSILON
                || self.risk < other.risk - DOMINANCE_EPSILON)
    }

    /// Both components within `epsilon` of `other`, relative to their
    /// magnitude (absolute below 1).
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= epsilon * a.abs().max(b.abs()).max(1.0);
        close(self.time, other.time) && close(self.risk, other.risk)
    }

    /// Lexicographic order: time, then risk.
    #[must_use]
    pub fn lexicographic(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.risk.total_cmp(&other.risk))
    }
}

impl Add for CostVector {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            time: self.time + rhs.time,
            risk: self.risk + rhs.risk,
        }
    }
}
