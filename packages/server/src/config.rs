//! Layered TOML configuration.
//!
//! The defaults in `saferoute.toml` are embedded in the binary. An override
//! file only needs the keys it changes; every section falls back to its
//! defaults. `BIND_ADDR` and `PORT` take precedence over the file.

use std::path::{Path, PathBuf};

use saferoute_hazard_models::HazardConfig;
use saferoute_network::NetworkConfig;
use saferoute_risk::RiskConfig;
use saferoute_routing::RoutingConfig;
use serde::Deserialize;

/// The embedded default configuration.
pub const DEFAULT_CONFIG: &str = include_str!("../saferoute.toml");

/// Environment variable naming an override file.
pub const CONFIG_ENV: &str = "SAFEROUTE_CONFIG";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The TOML was malformed or had the wrong shape.
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("Invalid config value: {message}")]
    Invalid {
        /// Which key and why.
        message: String,
    },
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Requests per client per sliding minute; 0 disables limiting.
    pub rate_limit_per_minute: usize,
    /// Road network loaded at startup.
    pub network_path: Option<PathBuf>,
    /// Incident feed file ingested at startup.
    pub incidents_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            rate_limit_per_minute: 60,
            network_path: None,
            incidents_path: None,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub hazard: HazardConfig,
    pub risk: RiskConfig,
    pub network: NetworkConfig,
    pub routing: RoutingConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML, or
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded defaults.
    ///
    /// # Errors
    ///
    /// Only if the embedded file is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Loads `path`, or the file named by `SAFEROUTE_CONFIG`, or the
    /// embedded defaults, then applies `BIND_ADDR` / `PORT`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the chosen file cannot be read or
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                let contents = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path, source })?;
                Self::from_toml(&contents)?
            }
            None => Self::embedded()?,
        };

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if !positive(self.hazard.decay.horizon_hours) {
            return invalid("hazard.decay.horizon_hours must be positive");
        }
        if !(self.hazard.retention_hours.is_finite()
            && self.hazard.retention_hours >= self.hazard.decay.horizon_hours)
        {
            return invalid("hazard.retention_hours must be at least hazard.decay.horizon_hours");
        }
        if !positive(self.risk.buffer_radius_m) {
            return invalid("risk.buffer_radius_m must be positive");
        }
        if !positive(self.risk.cell_size_m) {
            return invalid("risk.cell_size_m must be positive");
        }
        if !(self.risk.lighting_weight.is_finite() && self.risk.lighting_weight >= 0.0) {
            return invalid("risk.lighting_weight must be non-negative");
        }
        if !positive(self.network.max_snap_distance_m) {
            return invalid("network.max_snap_distance_m must be positive");
        }
        if self.routing.search.max_paths == 0 {
            return invalid("routing.max_paths must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.routing.search.overlap_ratio) {
            return invalid("routing.overlap_ratio must be within [0, 1]");
        }
        if let Some(region) = &self.hazard.service_region
            && !region.is_valid()
        {
            return invalid("hazard.service_region is not a valid bounding box");
        }
        Ok(())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
