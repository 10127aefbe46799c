#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for SafeRoute.
//!
//! Serves safety-aware routing, incident proximity queries and incident
//! ingestion over one in-memory road network and hazard store. Route
//! searches are CPU-bound and run on the blocking thread pool with a
//! per-request deadline; everything else reads an immutable hazard
//! snapshot.

pub mod config;
pub mod handlers;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use chrono::Utc;
use saferoute_hazard::{HazardError, HazardStore};
use saferoute_network::{NetworkError, RoadNetwork};
use saferoute_routing::RoutingService;

use crate::config::{AppConfig, ServerConfig};
use crate::rate_limit::RateLimiter;

/// How often expired incidents are dropped from the store.
const PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Largest accepted request body (incident batches).
const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("No road network configured (set server.network_path or pass --network)")]
    MissingNetwork,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Hazard(#[from] HazardError),
}

/// Shared application state.
pub struct AppState {
    pub routing: RoutingService,
    pub limiter: RateLimiter,
}

impl AppState {
    #[must_use]
    pub fn new(network: Arc<RoadNetwork>, hazards: Arc<HazardStore>, config: &AppConfig) -> Self {
        Self {
            routing: RoutingService::new(network, hazards, config.risk, config.routing),
            limiter: RateLimiter::per_minute(config.server.rate_limit_per_minute),
        }
    }

    /// Loads the configured network and, if configured, seeds the hazard
    /// store from an incident file.
    ///
    /// # Errors
    ///
    /// * [`StartupError::MissingNetwork`] if no network path is configured
    /// * [`StartupError::Network`] if the network cannot be loaded
    /// * [`StartupError::Hazard`] if the incident file cannot be read
    pub fn load(config: &AppConfig) -> Result<Self, StartupError> {
        let path = config
            .server
            .network_path
            .as_deref()
            .ok_or(StartupError::MissingNetwork)?;
        log::info!("Loading road network from {}...", path.display());
        let network = saferoute_network::load::load_file(path, config.network)?;

        let hazards = HazardStore::new(config.hazard.clone());
        if let Some(path) = &config.server.incidents_path {
            log::info!("Seeding incidents from {}...", path.display());
            let batch = saferoute_hazard::feed::load_feed_file(path)?;
            let now = Utc::now();
            hazards.ingest_batch(batch.incidents, now);
            hazards.mark_feed_success(now);
        }

        Ok(Self::new(Arc::new(network), Arc::new(hazards), config))
    }
}

/// Registers the `/api` routes and payload error handlers.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(handlers::query_error))
        .app_data(
            web::JsonConfig::default()
                .limit(MAX_PAYLOAD_BYTES)
                .error_handler(handlers::json_error),
        )
        .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
        .service(
            web::scope("/api")
                .route("/health", web::get().to(handlers::health))
                .route("/algorithm/find-path", web::get().to(handlers::find_path_get))
                .route("/algorithm/find-path", web::post().to(handlers::find_path_post))
                .route("/crime/nearby", web::get().to(handlers::nearby))
                .route("/crime/route-safety", web::post().to(handlers::route_safety))
                .route("/crime/hotspots", web::get().to(handlers::hotspots))
                .route("/crime/stats", web::get().to(handlers::stats))
                .route("/crimes/recent", web::get().to(handlers::recent))
                .route("/crimes/all", web::get().to(handlers::all))
                .route("/incidents", web::post().to(handlers::ingest)),
        );
}

/// Starts the HTTP server. The caller provides the async runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(state: AppState, server: &ServerConfig) -> std::io::Result<()> {
    let state = web::Data::new(state);

    let hazards = state.routing.shared_hazards();
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = hazards.purge_expired(Utc::now());
            if purged > 0 {
                log::info!("Purged {purged} expired incidents");
            }
        }
    });

    log::info!("Starting server on {}:{}", server.bind_addr, server.port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((server.bind_addr.as_str(), server.port))?
    .run()
    .await
}
