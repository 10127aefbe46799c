#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for SafeRoute.
//!
//! Runs the API server, computes route sets offline from a network file and
//! an incident file, and inspects the data files the server consumes.
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use saferoute_hazard::HazardStore;
use saferoute_hazard::feed::load_feed_file;
use saferoute_hazard::query::{NearbyQuery, nearby};
use saferoute_hazard_models::{GeoPoint, Severity};
use saferoute_network::RoadNetwork;
use saferoute_routing::{RouteOptions, RoutingService, SortOrder};
use saferoute_server::config::AppConfig;
use saferoute_server::{AppState, run_server};
use saferoute_server_models::{IngestResponse, NearbyResponse};
use serde::Serialize;

// ---------------------------------------------------------------------------
// CLI definitions
// ---------------------------------------------------------------------------

/// Safety-aware pedestrian routing.
#[derive(Parser)]
#[command(name = "saferoute")]
#[command(about = "Safety-aware pedestrian routing")]
struct Cli {
    /// TOML file overriding the built-in configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    Serve {
        /// Road network file (JSON or GeoJSON).
        #[arg(long)]
        network: Option<PathBuf>,

        /// Incident feed file to seed the hazard store with.
        #[arg(long)]
        incidents: Option<PathBuf>,

        #[arg(long)]
        bind_addr: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Compute the route set between two points and print it as JSON.
    Route {
        /// Road network file (JSON or GeoJSON).
        #[arg(long)]
        network: PathBuf,

        /// Incident feed file (JSON or CSV).
        #[arg(long)]
        incidents: Option<PathBuf>,

        /// Origin as `lat,lon`.
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        from: GeoPoint,

        /// Destination as `lat,lon`.
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        to: GeoPoint,

        #[arg(long)]
        max_paths: Option<usize>,

        /// `time`, `risk` or `balanced`.
        #[arg(long, default_value = "time")]
        sort: SortOrder,

        /// Never traverse an edge riskier than this.
        #[arg(long)]
        max_edge_risk: Option<f64>,

        /// Evaluate risk at this RFC 3339 instant instead of now.
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Load a road network and report its size and connectivity.
    ValidateNetwork {
        /// Road network file (JSON or GeoJSON).
        network: PathBuf,
    },

    /// Parse an incident feed file and report what would be ingested.
    ImportIncidents {
        /// Incident feed file (JSON or CSV).
        file: PathBuf,
    },

    /// List incidents near a point.
    Nearby {
        /// Incident feed file (JSON or CSV).
        #[arg(long)]
        incidents: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Meters.
        #[arg(long, default_value_t = 1000.0)]
        radius: f64,

        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// `high`, `medium` or `low`.
        #[arg(long)]
        severity: Option<Severity>,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Evaluate at this RFC 3339 instant instead of now.
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
}

/// Parses `lat,lon`.
fn parse_point(s: &str) -> Result<GeoPoint, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected 'lat,lon', got '{s}'"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("invalid latitude '{lat}': {e}"))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|e| format!("invalid longitude '{lon}': {e}"))?;
    let point = GeoPoint::new(lat, lon);
    if point.is_valid() {
        Ok(point)
    } else {
        Err(format!("({lat}, {lon}) is not a valid WGS84 coordinate"))
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct NetworkSummary {
    nodes: usize,
    edges: usize,
    /// Weakly connected components; more than one means some trips have no
    /// route.
    components: usize,
    bounds: Option<saferoute_hazard_models::BoundingBox>,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_network(
    path: &Path,
    config: &AppConfig,
) -> Result<RoadNetwork, Box<dyn std::error::Error>> {
    Ok(saferoute_network::load::load_file(path, config.network)?)
}

/// A hazard store seeded from `path`, with the feed marked healthy.
fn load_store(
    path: Option<&Path>,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<HazardStore, Box<dyn std::error::Error>> {
    let store = HazardStore::new(config.hazard.clone());
    if let Some(path) = path {
        let batch = load_feed_file(path)?;
        let report = store.ingest_batch(batch.incidents, now);
        log::info!(
            "Loaded {} incidents from {} ({} rejected)",
            report.accepted,
            path.display(),
            report.rejected.len()
        );
    }
    store.mark_feed_success(now);
    Ok(store)
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            network,
            incidents,
            bind_addr,
            port,
        } => {
            if network.is_some() {
                config.server.network_path = network;
            }
            if incidents.is_some() {
                config.server.incidents_path = incidents;
            }
            if let Some(addr) = bind_addr {
                config.server.bind_addr = addr;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let state = AppState::load(&config)?;
            run_server(state, &config.server).await?;
        }
        Commands::Route {
            network,
            incidents,
            from,
            to,
            max_paths,
            sort,
            max_edge_risk,
            as_of,
        } => {
            let as_of = as_of.unwrap_or_else(Utc::now);
            let network = load_network(&network, &config)?;
            // Incidents are validated against the evaluation instant, so a
            // historical `as_of` accepts the incidents of that time.
            let store = load_store(incidents.as_deref(), &config, as_of)?;
            let service = RoutingService::new(
                Arc::new(network),
                Arc::new(store),
                config.risk,
                config.routing,
            );
            let routes = service.find_path(
                from,
                to,
                &RouteOptions {
                    max_paths,
                    sort,
                    max_edge_risk,
                    as_of: Some(as_of),
                    cancel: None,
                },
            )?;
            print_json(&routes)?;
        }
        Commands::ValidateNetwork { network } => {
            let network = load_network(&network, &config)?;
            print_json(&NetworkSummary {
                nodes: network.node_count(),
                edges: network.edge_count(),
                components: petgraph::algo::connected_components(network.graph()),
                bounds: network.bounds(),
            })?;
        }
        Commands::ImportIncidents { file } => {
            let batch = load_feed_file(&file)?;
            let store = HazardStore::new(config.hazard.clone());
            let report = store.ingest_batch(batch.incidents, Utc::now());
            print_json(&IngestResponse {
                report,
                skipped: batch.skipped,
            })?;
        }
        Commands::Nearby {
            incidents,
            lat,
            lng,
            radius,
            hours,
            severity,
            limit,
            as_of,
        } => {
            let center = GeoPoint::new(lat, lng);
            if !center.is_valid() {
                return Err(format!("({lat}, {lng}) is not a valid WGS84 coordinate").into());
            }
            let as_of = as_of.unwrap_or_else(Utc::now);
            let store = load_store(Some(&incidents), &config, as_of)?;
            let result = nearby(
                &store.snapshot(),
                &NearbyQuery {
                    center,
                    radius_m: radius,
                    window: Duration::hours(hours),
                    severity,
                    limit,
                },
                as_of,
            );
            print_json(&NearbyResponse::new(center, radius, hours.saturating_mul(60), &result))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points() {
        let point = parse_point("39.95, -75.16").unwrap();
        assert!((point.lat - 39.95).abs() < f64::EPSILON);
        assert!((point.lon + 75.16).abs() < f64::EPSILON);
        assert!(parse_point("39.95").is_err());
        assert!(parse_point("95.0,0.0").is_err());
        assert!(parse_point("abc,0.0").is_err());
    }

    #[test]
    fn route_command_parses() {
        let cli = Cli::try_parse_from([
            "saferoute",
            "route",
            "--network",
            "net.json",
            "--from",
            "-33.86,151.2",
            "--to",
            "-33.87,151.21",
            "--sort",
            "balanced",
        ])
        .unwrap();
        let Commands::Route { from, sort, max_paths, .. } = cli.command else {
            panic!("expected route command");
        };
        assert!((from.lat + 33.86).abs() < f64::EPSILON);
        assert_eq!(sort, SortOrder::Balanced);
        assert_eq!(max_paths, None);
    }

    #[test]
    fn nearby_command_defaults() {
        let cli = Cli::try_parse_from([
            "saferoute",
            "--config",
            "custom.toml",
            "nearby",
            "--incidents",
            "feed.csv",
            "--lat",
            "39.95",
            "--lng",
            "-75.16",
            "--severity",
            "HIGH",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        let Commands::Nearby { radius, hours, severity, .. } = cli.command else {
            panic!("expected nearby command");
        };
        assert!((radius - 1000.0).abs() < f64::EPSILON);
        assert_eq!(hours, 24);
        assert_eq!(severity, Some(Severity::High));
    }

    #[test]
    fn unknown_enum_values_are_rejected() {
        let sort = Cli::try_parse_from([
            "saferoute", "route", "--network", "net.json", "--from", "0,0", "--to", "1,1",
            "--sort", "shortest",
        ]);
        assert!(sort.is_err());
        let severity = Cli::try_parse_from([
            "saferoute", "nearby", "--incidents", "feed.csv", "--lat", "0", "--lng", "0",
            "--severity", "extreme",
        ]);
        assert!(severity.is_err());
    }
}
