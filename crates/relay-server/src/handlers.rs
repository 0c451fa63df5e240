//! HTTP and WebSocket handlers for the relay server.
//!
//! This module wires the upgraded WebSocket connections into the relay.

use crate::config::{BrokerConfig, BrokerKind, Config};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tenvis_relay_core::{Broker, MemoryBroker, RedisBroker, Relay};
use tenvis_relay_transport::split_websocket;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over a broker.
    #[must_use]
    pub fn new(config: Config, broker: Arc<dyn Broker>) -> Self {
        Self {
            relay: Relay::with_config(broker, config.relay_config()),
            config,
        }
    }
}

/// Connect the broker named by the configuration.
///
/// # Errors
///
/// Returns an error if the Redis broker cannot be reached.
pub async fn build_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    match config.kind {
        BrokerKind::Redis => {
            let broker = RedisBroker::connect(&config.url)
                .await
                .with_context(|| format!("Failed to connect to broker at {}", config.url))?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => {
            warn!("Using in-memory broker: messages will not reach other instances");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_route = format!(
        "{}/*user_path",
        state.config.transport.websocket_path.trim_end_matches('/')
    );

    Router::new()
        .route(&ws_route, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the broker is unreachable or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let broker = build_broker(&config.broker).await?;
    let state = Arc::new(AppState::new(config.clone(), broker));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/<userId>",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.relay.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats().await;
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "groups": stats.group_count,
        "topics": stats.subscription_count,
    }))
}

/// The user id is the last non-empty segment of the upgrade path.
fn user_id_from_path(path: &str) -> Option<&str> {
    path.rsplit('/').find(|segment| !segment.is_empty())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_path): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(user_id) = user_id_from_path(&user_path).map(str::to_string) else {
        debug!(path = %user_path, "Upgrade without user id");
        return (StatusCode::BAD_REQUEST, "missing user id").into_response();
    };

    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, user_id, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: axum::extract::ws::WebSocket, user_id: String, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    debug!(user = %user_id, "WebSocket connected");

    let (sink, stream) = split_websocket(socket, state.config.transport.max_message_size);
    if let Err(e) = state.relay.serve(&user_id, sink, stream).await {
        warn!(user = %user_id, error = %e, "Connection rejected");
        metrics::record_error("connect");
    }

    metrics::record_stats(&state.relay.stats().await);
    debug!(user = %user_id, "WebSocket disconnected");
}
