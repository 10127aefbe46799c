#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident ingestion, spatial indexing, and proximity queries.
//!
//! The [`HazardStore`] is the single writer of incident data. Readers take
//! an immutable [`HazardSnapshot`] and run every query against it, so a
//! route computation sees one consistent view of the incident set even
//! while new reports are being ingested.
//!
//! Incoming feeds are parsed by [`feed`], classified by keyword in
//! [`classify`], and summarized for proximity alerting by [`query`].

pub mod assessment;
pub mod classify;
pub mod export;
pub mod feed;
pub mod query;
pub mod store;

pub use store::{
    FeedStatus, HazardSnapshot, HazardStore, IngestOutcome, IngestReport, RejectedIncident,
};

/// Errors that can occur while ingesting or exporting incident data.
#[derive(Debug, thiserror::Error)]
pub enum HazardError {
    /// An incident failed validation and was not stored.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the incident.
        message: String,
    },

    /// The upstream feed could not be parsed.
    #[error("Upstream data error: {message}")]
    UpstreamData {
        /// Description of the malformed input.
        message: String,
    },

    /// CSV serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HazardError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamData {
            message: message.into(),
        }
    }
}
