//! ==============================================================================
//! main.rs - sensor dashboard entry point
//! ==============================================================================
//!
//! purpose:
//!     serves two views of the same iot device (luminosity, temperature,
//!     humidity):
//!     - a history chart fed by polling the STH short-term history api
//!     - a live gauge fed by the mqtt broker the device publishes to
//!
//! responsibilities:
//!     - load configuration and set up logging
//!     - run the poll loop that owns the history series
//!     - run the broker listener that feeds the live view
//!     - serve both pages plus their json / websocket endpoints
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                       rust host (this file)                   │
//!     │  ┌─────────────┐   ┌──────────────┐   ┌───────────────────┐  │
//!     │  │ poll loop   │   │ mqtt listener│   │ web server        │  │
//!     │  │ (5s cycle)  │   │ (live topics)│   │ (port 8050)       │  │
//!     │  └──────┬──────┘   └──────┬───────┘   └────┬─────────┬────┘  │
//!     │         │ writes          │ broadcasts     │ reads   │ ws    │
//!     │   ┌─────┴──────┐    ┌─────┴──────┐         │         │       │
//!     │   │ AppState   │<───┼────────────┼─────────┘         │       │
//!     │   │ (Series)   │    │ LiveFeed   │───────────────────┘       │
//!     │   └────────────┘    └────────────┘                           │
//!     └──────────────────────────────────────────────────────────────┘
//!           ▲                      ▲
//!           │ http (lastN)         │ mqtt
//!     ┌─────┴──────┐         ┌─────┴──────┐
//!     │  STH api   │         │   broker   │
//!     └────────────┘         └────────────┘
//!
//! the two paths never share state: only the poll loop writes the series,
//! and the live feed keeps no history.
//!
//! ==============================================================================

mod config;
mod domain;
mod live;
mod poller;
mod render;
mod series;
mod server;
mod sth;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{prelude::*, reload, EnvFilter, Registry};

use crate::config::DashboardConfig;
use crate::live::{LiveFeed, MqttListener};
use crate::poller::{Poller, SharedState};
use crate::server::AppContext;
use crate::sth::SthClient;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: logging first, so config loading is visible
    let log_filter = init_tracing();

    tracing::info!("===========================================================");
    tracing::info!("  Sensor Dashboard - STH history + MQTT live view");
    tracing::info!("===========================================================");

    // step 2: load configuration, then apply its log level
    let config = DashboardConfig::load_or_default()?;
    if std::env::var_os("RUST_LOG").is_none() {
        if let Err(e) = log_filter.reload(EnvFilter::new(&config.logging.level)) {
            tracing::warn!("[STARTUP] Could not apply log level {:?}: {}", config.logging.level, e);
        }
    }
    config.print_summary();
    let tz = config.timezone()?;

    // step 3: shared state for the two paths
    let state = SharedState::default();
    let live = LiveFeed::new();

    // step 4: web server in background
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("invalid server.bind / server.port")?;
    let ctx = AppContext {
        state: state.clone(),
        live: live.clone(),
        attribute: config.sth.attribute.clone(),
        refresh_ms: config.polling.interval_seconds.saturating_mul(1000),
    };
    let server = tokio::spawn(server::run_server(addr, ctx));

    // step 5: broker listener in background
    if config.mqtt.enabled {
        tokio::spawn(MqttListener::new(config.mqtt.clone(), live).run());
    } else {
        tracing::info!("[STARTUP] MQTT disabled - live view will stay idle");
    }

    // step 6: poll loop until the server shuts down
    let source = SthClient::new(config.sth.clone()).context("failed to build STH client")?;
    let poller = Poller::new(source, config.polling.last_n, tz, state)
        .show_data(config.logging.show_sensor_data);

    tokio::select! {
        _ = poller.run(Duration::from_secs(config.polling.interval_seconds)) => {}
        joined = server => {
            joined.context("web server task panicked")??;
        }
    }

    Ok(())
}

/// fmt subscriber with a filter that can be swapped once config is known
fn init_tracing() -> reload::Handle<EnvFilter, Registry> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    handle
}
