//! Flat CSV/JSON export rows for incident listings.

use std::io::Write;

use saferoute_hazard_models::Incident;
use serde::Serialize;

use crate::HazardError;
use crate::query::RecentIncident;

/// One incident flattened for tabular export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub crime_id: String,
    /// RFC 3339.
    pub datetime: String,
    pub date: String,
    pub time: String,
    pub hour: u32,
    pub crime_type: String,
    pub crime_category: String,
    pub severity: String,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub district: Option<String>,
    pub source: Option<String>,
    pub minutes_ago: Option<i64>,
    pub is_breaking: Option<bool>,
}

impl From<&Incident> for ExportRow {
    fn from(incident: &Incident) -> Self {
        use chrono::Timelike as _;

        Self {
            crime_id: incident.id.clone(),
            datetime: incident.timestamp.to_rfc3339(),
            date: incident.timestamp.format("%Y-%m-%d").to_string(),
            time: incident.timestamp.format("%H:%M:%S").to_string(),
            hour: incident.timestamp.hour(),
            crime_type: incident.type_label(),
            crime_category: incident.category.to_string(),
            severity: incident.severity.to_string(),
            address: incident.block_address.clone(),
            latitude: incident.position.lat,
            longitude: incident.position.lon,
            district: incident.district.clone(),
            source: incident.source.clone(),
            minutes_ago: None,
            is_breaking: None,
        }
    }
}

impl From<&RecentIncident> for ExportRow {
    fn from(recent: &RecentIncident) -> Self {
        Self {
            minutes_ago: Some(recent.minutes_ago),
            is_breaking: Some(recent.is_breaking),
            ..Self::from(&recent.incident)
        }
    }
}

/// Writes `rows` as CSV with a header row. Writes nothing for an empty
/// slice.
///
/// # Errors
///
/// Returns an error if serialization or the underlying writer fails.
pub fn write_csv<W: Write>(rows: &[ExportRow], writer: W) -> Result<(), HazardError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// [`write_csv`] into a `String`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_csv_string(rows: &[ExportRow]) -> Result<String, HazardError> {
    let mut buffer = Vec::new();
    write_csv(rows, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| HazardError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use saferoute_hazard_models::{GeoPoint, IncidentCategory, Severity};

    use super::*;

    fn robbery() -> Incident {
        let mut incident = Incident::new(
            "P-1",
            GeoPoint::new(39.95, -75.16),
            Utc.with_ymd_and_hms(2024, 5, 1, 22, 15, 0).unwrap(),
            IncidentCategory::Violent,
            Severity::High,
        );
        incident.crime_type = Some("Robbery".to_string());
        incident.district = Some("6".to_string());
        incident
    }

    #[test]
    fn csv_has_header_and_flattened_fields() {
        let rows = vec![ExportRow::from(&robbery())];
        let csv = to_csv_string(&rows).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("crime_id,datetime,date,time,hour,crime_type"));
        let row = lines.next().unwrap();
        let prefix = "P-1,2024-05-01T22:15:00+00:00,2024-05-01,22:15:00,22,Robbery,violent,high,";
        assert!(row.starts_with(prefix), "{row}");
        assert!(lines.next().is_none());
    }

    #[test]
    fn recent_rows_carry_age() {
        let recent = RecentIncident::new(
            robbery(),
            Utc.with_ymd_and_hms(2024, 5, 1, 22, 45, 0).unwrap(),
        );
        let row = ExportRow::from(&recent);
        assert_eq!(row.minutes_ago, Some(30));
        assert_eq!(row.is_breaking, Some(true));
    }

    #[test]
    fn empty_export_is_empty() {
        assert_eq!(to_csv_string(&[]).unwrap(), "");
    }
}
