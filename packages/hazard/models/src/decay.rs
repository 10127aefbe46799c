//! Severity, category, time and distance weighting for incidents.
//!
//! Every factor lies in `[0, 1]` (weights in the tables may exceed one but
//! are clamped at zero) and is monotonically non-increasing in age and in
//! distance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Incident, IncidentCategory, Severity};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Shape of the age-based decay curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TimeDecay {
    /// Falls linearly from 1 at age zero to 0 at the horizon.
    Linear,
    /// Halves every `half_life_hours` and is cut to 0 at the horizon.
    Exponential {
        /// Age at which the weight has halved.
        half_life_hours: f64,
    },
}

impl TimeDecay {
    /// Decay factor for an incident `age_hours` old.
    ///
    /// Negative ages (incidents after the evaluation instant) and ages at or
    /// past the horizon yield 0.
    #[must_use]
    pub fn factor(&self, age_hours: f64, horizon_hours: f64) -> f64 {
        if !age_hours.is_finite()
            || age_hours < 0.0
            || horizon_hours <= 0.0
            || age_hours >= horizon_hours
        {
            return 0.0;
        }
        match *self {
            Self::Linear => 1.0 - age_hours / horizon_hours,
            Self::Exponential { half_life_hours } => {
                if half_life_hours <= 0.0 {
                    0.0
                } else {
                    0.5_f64.powf(age_hours / half_life_hours)
                }
            }
        }
    }
}

/// Shape of the distance taper around an incident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceDecay {
    /// `1 - d / r`
    #[default]
    Linear,
    /// `(1 - d / r)^2`
    Quadratic,
}

impl DistanceDecay {
    /// Decay factor at `distance_m` from an incident with buffer `radius_m`.
    #[must_use]
    pub fn factor(&self, distance_m: f64, radius_m: f64) -> f64 {
        if !distance_m.is_finite() || radius_m <= 0.0 {
            return 0.0;
        }
        let distance_m = distance_m.max(0.0);
        if distance_m >= radius_m {
            return 0.0;
        }
        let remaining = 1.0 - distance_m / radius_m;
        match self {
            Self::Linear => remaining,
            Self::Quadratic => remaining * remaining,
        }
    }
}

/// Weight per [`Severity`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            high: 1.0,
            medium: 0.6,
            low: 0.3,
        }
    }
}

impl SeverityWeights {
    #[must_use]
    pub fn weight(&self, severity: Severity) -> f64 {
        let w = match severity {
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        };
        w.max(0.0)
    }
}

/// Weight per [`IncidentCategory`]. Defaults to 1.0 everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub violent: f64,
    pub property: f64,
    pub drug: f64,
    pub other: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            violent: 1.0,
            property: 1.0,
            drug: 1.0,
            other: 1.0,
        }
    }
}

impl CategoryWeights {
    #[must_use]
    pub fn weight(&self, category: IncidentCategory) -> f64 {
        let w = match category {
            IncidentCategory::Violent => self.violent,
            IncidentCategory::Property => self.property,
            IncidentCategory::Drug => self.drug,
            IncidentCategory::Other => self.other,
        };
        w.max(0.0)
    }
}

/// Combined weighting applied to each incident before distance taper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayModel {
    /// Age at which an incident stops contributing.
    pub horizon_hours: f64,
    pub time_decay: TimeDecay,
    pub severity_weights: SeverityWeights,
    pub category_weights: CategoryWeights,
    /// Weights at or below this are treated as zero.
    pub epsilon: f64,
}

impl Default for DecayModel {
    fn default() -> Self {
        Self {
            horizon_hours: 168.0,
            time_decay: TimeDecay::Linear,
            severity_weights: SeverityWeights::default(),
            category_weights: CategoryWeights::default(),
            epsilon: 1e-6,
        }
    }
}

impl DecayModel {
    /// Age of `timestamp` relative to `as_of`, in hours. Negative when
    /// `timestamp` is later than `as_of`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn age_hours(timestamp: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
        (as_of - timestamp).num_milliseconds() as f64 / MILLIS_PER_HOUR
    }

    /// The horizon as a `chrono` duration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.horizon_hours.max(0.0) * MILLIS_PER_HOUR) as i64)
    }

    #[must_use]
    pub fn time_factor(&self, timestamp: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
        self.time_decay
            .factor(Self::age_hours(timestamp, as_of), self.horizon_hours)
    }

    /// `severityWeight * categoryWeight * timeDecay` for `incident` at `as_of`.
    #[must_use]
    pub fn incident_weight(&self, incident: &Incident, as_of: DateTime<Utc>) -> f64 {
        self.severity_weights.weight(incident.severity)
            * self.category_weights.weight(incident.category)
            * self.time_factor(incident.timestamp, as_of)
    }

    /// Whether the incident still carries non-negligible weight at `as_of`.
    #[must_use]
    pub fn is_significant(&self, incident: &Incident, as_of: DateTime<Utc>) -> bool {
        self.incident_weight(incident, as_of) > self.epsilon
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::GeoPoint;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn incident(severity: Severity, age: Duration) -> Incident {
        Incident::new(
            "x",
            GeoPoint::new(41.0, -87.0),
            now() - age,
            IncidentCategory::Violent,
            severity,
        )
    }

    #[test]
    fn time_decay_starts_at_one() {
        assert!((TimeDecay::Linear.factor(0.0, 168.0) - 1.0).abs() < f64::EPSILON);
        let exp = TimeDecay::Exponential {
            half_life_hours: 24.0,
        };
        assert!((exp.factor(0.0, 168.0) - 1.0).abs() < f64::EPSILON);
        assert!((exp.factor(24.0, 168.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn time_decay_is_monotone_and_zero_at_horizon() {
        for shape in [
            TimeDecay::Linear,
            TimeDecay::Exponential {
                half_life_hours: 36.0,
            },
        ] {
            let mut previous = f64::INFINITY;
            for age in 0..=200 {
                let f = shape.factor(f64::from(age), 168.0);
                assert!(f <= previous, "{shape:?} increased at age {age}");
                assert!(f >= 0.0);
                previous = f;
            }
            assert!(shape.factor(168.0, 168.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn future_incidents_weigh_nothing() {
        assert!(TimeDecay::Linear.factor(-0.5, 168.0).abs() < f64::EPSILON);
    }

    #[test]
    fn distance_decay_tapers_to_zero() {
        for shape in [DistanceDecay::Linear, DistanceDecay::Quadratic] {
            assert!((shape.factor(0.0, 100.0) - 1.0).abs() < f64::EPSILON);
            assert!(shape.factor(100.0, 100.0).abs() < f64::EPSILON);
            assert!(shape.factor(150.0, 100.0).abs() < f64::EPSILON);
            let mut previous = f64::INFINITY;
            for d in 0..=100 {
                let f = shape.factor(f64::from(d), 100.0);
                assert!(f <= previous, "{shape:?} increased at distance {d}");
                previous = f;
            }
        }
        assert!((DistanceDecay::Quadratic.factor(50.0, 100.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn high_severity_outweighs_low() {
        let model = DecayModel::default();
        let high = model.incident_weight(&incident(Severity::High, Duration::hours(1)), now());
        let low = model.incident_weight(&incident(Severity::Low, Duration::hours(1)), now());
        assert!(high > low, "high={high} low={low}");
    }

    #[test]
    fn expired_incidents_are_insignificant() {
        let model = DecayModel::default();
        let old = incident(Severity::High, Duration::days(8));
        assert!(DecayModel::age_hours(old.timestamp, now()) >= model.horizon_hours);
        assert!(!model.is_significant(&old, now()));
        let fresh = incident(Severity::Low, Duration::hours(2));
        assert!(model.is_significant(&fresh, now()));
    }

    #[test]
    fn horizon_duration_matches_hours() {
        let model = DecayModel::default();
        assert_eq!(model.horizon(), Duration::days(7));
    }
}
