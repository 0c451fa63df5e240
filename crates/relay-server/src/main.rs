//! # Relay Server
//!
//! Presence-aware message relay: direct, group and broadcast messages between
//! WebSocket clients, bridged across instances through a pub/sub broker.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (Redis on localhost)
//! relay
//!
//! # Run with a custom config file
//! RELAY_CONFIG=/path/to/relay.toml relay
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 RELAY_BROKER_URL=redis://redis:6379 relay
//! ```
//!
//! Clients connect to `ws://<host>:<port>/ws/<userId>`.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=info,tenvis_relay_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        broker = ?config.broker.kind,
        "Starting relay server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
