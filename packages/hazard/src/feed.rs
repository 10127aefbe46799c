//! Parsing of upstream incident feeds.
//!
//! Feeds arrive as JSON (a bare array, or an object wrapping the array in
//! `incidents`, `crimes` or `data`) or as CSV with a header row. Field names
//! vary between publishers, so [`RawIncidentRecord`] accepts the common
//! aliases. A record that cannot be normalized is skipped and reported; a
//! document that cannot be parsed at all is an
//! [`HazardError::UpstreamData`].

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use saferoute_hazard_models::{GeoPoint, Incident, IncidentCategory, Severity};
use serde::{Deserialize, Deserializer, Serialize};

use crate::HazardError;
use crate::classify::{categorize, severity_for};

/// One record as published by an upstream feed, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIncidentRecord {
    #[serde(
        default,
        alias = "incident_id",
        alias = "case_number",
        alias = "dc_key",
        deserialize_with = "string_or_number"
    )]
    pub id: Option<String>,
    #[serde(default, alias = "latitude", alias = "point_y")]
    pub lat: Option<f64>,
    #[serde(default, alias = "lon", alias = "lng", alias = "longitude", alias = "point_x")]
    pub lng: Option<f64>,
    #[serde(
        default,
        alias = "datetime",
        alias = "date",
        alias = "dispatch_date_time",
        alias = "occurred_at"
    )]
    pub timestamp: Option<String>,
    #[serde(
        default,
        alias = "type",
        alias = "primary_type",
        alias = "text_general_code"
    )]
    pub crime_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default, alias = "dc_dist", deserialize_with = "string_or_number")]
    pub district: Option<String>,
    #[serde(default, alias = "block", alias = "location_block")]
    pub block_address: Option<String>,
}

/// Feeds publish ids and district numbers as either strings or numbers.
fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(Option::<Value>::deserialize(deserializer)?.map(|value| match value {
        Value::Text(s) => s,
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
    }))
}

impl RawIncidentRecord {
    /// Converts the record into an [`Incident`].
    ///
    /// Category and severity fall back to keyword classification of the
    /// raw type when the feed does not provide them.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or malformed field.
    pub fn normalize(self, source: Option<&str>) -> Result<Incident, String> {
        let id = self
            .id
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .ok_or("missing id")?;

        let (lat, lng) = parse_lat_lng(self.lat, self.lng).ok_or("missing or zero coordinates")?;

        let raw_timestamp = self.timestamp.ok_or("missing timestamp")?;
        let timestamp = parse_timestamp(&raw_timestamp)
            .ok_or_else(|| format!("unparseable timestamp '{raw_timestamp}'"))?;

        let crime_type = self
            .crime_type
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        let type_text = crime_type.as_deref().unwrap_or_default();

        let category = match self.category.as_deref() {
            Some(raw) => raw
                .trim()
                .parse::<IncidentCategory>()
                .map_err(|_| format!("unknown category '{raw}'"))?,
            None => categorize(type_text),
        };
        let severity = match self.severity.as_deref() {
            Some(raw) => raw
                .trim()
                .parse::<Severity>()
                .map_err(|_| format!("unknown severity '{raw}'"))?,
            None => severity_for(type_text),
        };

        Ok(Incident {
            id,
            position: GeoPoint::new(lat, lng),
            timestamp,
            category,
            severity,
            crime_type,
            district: self.district.filter(|d| !d.trim().is_empty()),
            block_address: self.block_address.filter(|b| !b.trim().is_empty()),
            source: source.map(str::to_owned),
        })
    }
}

/// A record the parser could not turn into an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Zero-based position of the record in the feed.
    pub index: usize,
    pub reason: String,
}

/// Incidents parsed from one feed document.
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub incidents: Vec<Incident>,
    pub skipped: Vec<SkippedRecord>,
}

impl FeedBatch {
    fn push(&mut self, index: usize, record: RawIncidentRecord, source: Option<&str>) {
        match record.normalize(source) {
            Ok(incident) => self.incidents.push(incident),
            Err(reason) => {
                log::warn!("Skipping feed record {index}: {reason}");
                self.skipped.push(SkippedRecord { index, reason });
            }
        }
    }

    fn finish(self) -> Result<Self, HazardError> {
        if self.incidents.is_empty() && !self.skipped.is_empty() {
            return Err(HazardError::upstream(format!(
                "none of the {} feed records could be parsed (first: {})",
                self.skipped.len(),
                self.skipped[0].reason
            )));
        }
        log::info!(
            "Parsed {} incidents from feed ({} skipped)",
            self.incidents.len(),
            self.skipped.len()
        );
        Ok(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonFeed {
    Records(Vec<serde_json::Value>),
    Wrapped {
        #[serde(alias = "crimes", alias = "data")]
        incidents: Vec<serde_json::Value>,
    },
}

/// Parses a JSON feed document.
///
/// # Errors
///
/// Returns [`HazardError::UpstreamData`] if the document is not one of the
/// accepted shapes or contains records but none are usable.
pub fn parse_json_feed(bytes: &[u8], source: Option<&str>) -> Result<FeedBatch, HazardError> {
    let feed: JsonFeed = serde_json::from_slice(bytes)
        .map_err(|e| HazardError::upstream(format!("malformed JSON feed: {e}")))?;
    let values = match feed {
        JsonFeed::Records(values) | JsonFeed::Wrapped { incidents: values } => values,
    };

    let mut batch = FeedBatch::default();
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<RawIncidentRecord>(value) {
            Ok(record) => batch.push(index, record, source),
            Err(e) => {
                log::warn!("Skipping feed record {index}: {e}");
                batch.skipped.push(SkippedRecord {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }
    batch.finish()
}

/// Parses a CSV feed with a header row.
///
/// # Errors
///
/// Returns [`HazardError::UpstreamData`] if the header row is missing or no
/// row is usable.
pub fn parse_csv_feed(reader: impl Read, source: Option<&str>) -> Result<FeedBatch, HazardError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| HazardError::upstream(format!("malformed CSV header: {e}")))?
        .clone();
    if headers.is_empty() {
        return Err(HazardError::upstream("CSV feed contains no header row"));
    }

    let mut batch = FeedBatch::default();
    for (index, row) in reader.records().enumerate() {
        let parsed = row.and_then(|record| record.deserialize::<RawIncidentRecord>(Some(&headers)));
        match parsed {
            Ok(record) => batch.push(index, record, source),
            Err(e) => {
                log::warn!("Skipping CSV row {index}: {e}");
                batch.skipped.push(SkippedRecord {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }
    batch.finish()
}

/// Reads a feed file, choosing the parser by extension (`.csv` or JSON
/// otherwise). The file stem is recorded as the incident source.
///
/// # Errors
///
/// Returns [`HazardError::Io`] if the file cannot be read, or
/// [`HazardError::UpstreamData`] if it cannot be parsed.
pub fn load_feed_file(path: &Path) -> Result<FeedBatch, HazardError> {
    let bytes = std::fs::read(path)?;
    let source = path.file_stem().and_then(|s| s.to_str());
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    log::debug!("Loading incident feed from {}", path.display());
    if is_csv {
        parse_csv_feed(bytes.as_slice(), source)
    } else {
        parse_json_feed(&bytes, source)
    }
}

/// Parses an incident timestamp.
///
/// Accepts RFC 3339, ISO 8601 without an offset (assumed UTC), `YYYY-MM-DD
/// HH:MM:SS`, and the `MM/DD/YYYY HH:MM:SS AM` style used by several city
/// portals.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%m/%d/%Y %I:%M:%S %p",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|naive| naive.and_utc())
}

/// Returns `None` if either coordinate is missing or exactly zero, which
/// feeds use as a "not geocoded" marker.
#[must_use]
pub fn parse_lat_lng(lat: Option<f64>, lng: Option<f64>) -> Option<(f64, f64)> {
    let latitude = lat?;
    let longitude = lng?;
    if latitude == 0.0 || longitude == 0.0 {
        return None;
    }
    Some((latitude, longitude))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_json_and_classifies() {
        let json = br#"{"crimes": [
            {"id": "1", "lat": 39.95, "lng": -75.16, "datetime": "2024-05-01T10:00:00Z",
             "type": "Robbery Firearm", "district": "6"},
            {"id": "2", "latitude": 39.96, "longitude": -75.17, "date": "2024-05-01 11:30:00",
             "type": "Thefts"}
        ]}"#;
        let batch = parse_json_feed(json, Some("philly")).unwrap();
        assert_eq!(batch.incidents.len(), 2);
        assert!(batch.skipped.is_empty());

        let first = &batch.incidents[0];
        assert_eq!(first.category, IncidentCategory::Violent);
        assert_eq!(first.severity, Severity::High);
        assert_eq!(first.district.as_deref(), Some("6"));
        assert_eq!(first.source.as_deref(), Some("philly"));
        assert_eq!(batch.incidents[1].category, IncidentCategory::Property);
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let json = br#"[
            {"id": 42, "lat": 41.0, "lng": -87.0, "datetime": "2024-05-01T10:00:00Z", "district": 6}
        ]"#;
        let batch = parse_json_feed(json, None).unwrap();
        assert_eq!(batch.incidents[0].id, "42");
        assert_eq!(batch.incidents[0].district.as_deref(), Some("6"));
    }

    #[test]
    fn explicit_category_and_severity_win() {
        let json = br#"[{"id": "x", "lat": 1.5, "lon": 2.5, "timestamp": "2024-05-01T10:00:00Z",
            "type": "Robbery", "category": "other", "severity": "low"}]"#;
        let batch = parse_json_feed(json, None).unwrap();
        assert_eq!(batch.incidents[0].category, IncidentCategory::Other);
        assert_eq!(batch.incidents[0].severity, Severity::Low);
    }

    #[test]
    fn skips_bad_records_but_keeps_good_ones() {
        let json = br#"[
            {"id": "ok", "lat": 41.0, "lng": -87.0, "datetime": "2024-05-01T10:00:00Z"},
            {"id": "zero", "lat": 0.0, "lng": -87.0, "datetime": "2024-05-01T10:00:00Z"},
            {"lat": 41.0, "lng": -87.0, "datetime": "2024-05-01T10:00:00Z"},
            {"id": "bad-time", "lat": 41.0, "lng": -87.0, "datetime": "yesterday"}
        ]"#;
        let batch = parse_json_feed(json, None).unwrap();
        assert_eq!(batch.incidents.len(), 1);
        let indexes: Vec<usize> = batch.skipped.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn malformed_documents_are_upstream_errors() {
        assert!(matches!(
            parse_json_feed(b"{not json", None),
            Err(HazardError::UpstreamData { .. })
        ));
        assert!(matches!(
            parse_json_feed(br#"[{"id": "a"}]"#, None),
            Err(HazardError::UpstreamData { .. })
        ));
        let empty = parse_json_feed(b"[]", None).unwrap();
        assert!(empty.incidents.is_empty());
    }

    #[test]
    fn parses_csv_feed() {
        let csv = "case_number,latitude,longitude,date,primary_type,block\n\
                   JA100,41.88,-87.63,05/01/2024 10:15:00 PM,NARCOTICS,001XX W MADISON ST\n\
                   JA101,,-87.63,05/01/2024 10:15:00 PM,THEFT,\n";
        let batch = parse_csv_feed(csv.as_bytes(), Some("chicago")).unwrap();
        assert_eq!(batch.incidents.len(), 1);
        assert_eq!(batch.skipped.len(), 1);

        let incident = &batch.incidents[0];
        assert_eq!(incident.id, "JA100");
        assert_eq!(incident.category, IncidentCategory::Drug);
        assert_eq!(incident.block_address.as_deref(), Some("001XX W MADISON ST"));
        assert_eq!(incident.timestamp.to_rfc3339(), "2024-05-01T22:15:00+00:00");
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2024-01-15T14:30:00.000").is_some());
        assert!(parse_timestamp("2024-01-15T14:30:00-05:00").is_some());
        assert!(parse_timestamp("2024-01-15 14:30:00").is_some());
        assert!(parse_timestamp("01/15/2024 02:30:00 PM").is_some());
        assert!(parse_timestamp("not-a-date").is_none());
    }
}
