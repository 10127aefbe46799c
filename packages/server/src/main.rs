#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Standalone SafeRoute API server.
//!
//! Reads configuration from `SAFEROUTE_CONFIG` (or the embedded defaults),
//! loads the configured road network and serves the API.

use saferoute_server::config::AppConfig;
use saferoute_server::{AppState, run_server};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = AppConfig::load(None)?;
    let state = AppState::load(&config)?;
    run_server(state, &config.server).await?;
    Ok(())
}
