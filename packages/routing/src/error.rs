//! Client-facing error taxonomy.

use saferoute_hazard::HazardError;
use saferoute_network::NetworkError;
use saferoute_pathfinder::SearchError;
use serde::Serialize;

/// Stable, machine-readable error codes returned to clients.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    OutOfCoverage,
    NoRoute,
    Timeout,
    UpstreamDataError,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    /// HTTP status the code is served with.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::NoRoute => 404,
            Self::OutOfCoverage => 422,
            Self::RateLimited => 429,
            Self::UpstreamDataError => 502,
            Self::InternalError => 500,
            Self::Timeout => 503,
        }
    }
}

/// Errors surfaced by the routing service.
///
/// Messages are safe to show to clients; search internals are reduced to
/// a short description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// Bad coordinates, times or options.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the request.
        message: String,
    },

    /// An endpoint is too far from the road network.
    #[error("Out of coverage: {message}")]
    OutOfCoverage {
        /// Which endpoint and how far.
        message: String,
    },

    /// Origin and destination are not connected.
    #[error("No route: {message}")]
    NoRoute {
        /// The snapped nodes.
        message: String,
    },

    /// The search exceeded its time or work budget.
    #[error("Timeout: {message}")]
    Timeout {
        /// What ran out.
        message: String,
    },

    /// The incident feed delivered data that could not be used.
    #[error("Upstream data error: {message}")]
    UpstreamData {
        /// Description of the bad input.
        message: String,
    },
}

impl RoutingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::OutOfCoverage { .. } => ErrorCode::OutOfCoverage,
            Self::NoRoute { .. } => ErrorCode::NoRoute,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::UpstreamData { .. } => ErrorCode::UpstreamDataError,
        }
    }

    /// The message without the variant prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message }
            | Self::OutOfCoverage { message }
            | Self::NoRoute { message }
            | Self::Timeout { message }
            | Self::UpstreamData { message } => message,
        }
    }
}

impl From<NetworkError> for RoutingError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::OutOfCoverage { .. } => Self::OutOfCoverage {
                message: e.to_string(),
            },
            other => Self::UpstreamData {
                message: other.to_string(),
            },
        }
    }
}

impl From<SearchError> for RoutingError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::NoRoute { .. } => Self::NoRoute {
                message: e.to_string(),
            },
            SearchError::Timeout(reason) => Self::Timeout {
                message: format!("route search stopped ({reason})"),
            },
        }
    }
}

impl From<HazardError> for RoutingError {
    fn from(e: HazardError) -> Self {
        match e {
            HazardError::Validation { message } => Self::Validation { message },
            other => Self::UpstreamData {
                message: other.to_string(),
            },
        }
    }
}
