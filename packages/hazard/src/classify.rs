//! Keyword classification of free-text incident types.
//!
//! Feeds frequently report only a raw type string such as
//! `"ROBBERY - ARMED: HANDGUN"`. These helpers derive the coarse
//! [`IncidentCategory`] and [`Severity`] from it, case-insensitively.

use saferoute_hazard_models::{IncidentCategory, Severity};

/// Maps a raw incident type to its category.
///
/// Returns [`IncidentCategory::Other`] when no keyword matches.
#[must_use]
pub fn categorize(raw: &str) -> IncidentCategory {
    let upper = raw.to_uppercase();

    // Violent first: "ARMED ROBBERY OF VEHICLE" is violent, not property.
    if contains_any(
        &upper,
        &[
            "HOMICIDE", "MURDER", "RAPE", "SEXUAL", "ROBBERY", "ARMED", "ASSAULT", "BATTERY",
        ],
    ) {
        return IncidentCategory::Violent;
    }
    if contains_any(
        &upper,
        &["BURGLARY", "BREAKING", "THEFT", "LARCENY", "STOLEN", "VEHICLE", "AUTO"],
    ) {
        return IncidentCategory::Property;
    }
    if contains_any(&upper, &["DRUG", "NARCOTIC"]) {
        return IncidentCategory::Drug;
    }
    if contains_any(&upper, &["VANDALISM", "DAMAGE"]) {
        return IncidentCategory::Property;
    }

    IncidentCategory::Other
}

/// Maps a raw incident type to its severity.
#[must_use]
pub fn severity_for(raw: &str) -> Severity {
    let upper = raw.to_uppercase();

    if contains_any(&upper, &["HOMICIDE", "MURDER", "RAPE", "ROBBERY", "ARMED"]) {
        Severity::High
    } else if contains_any(&upper, &["ASSAULT", "BURGLARY", "VEHICLE", "AUTO"]) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
