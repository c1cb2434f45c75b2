//! HTTP server implementation using Axum.

use crate::websocket::WebSocketTransport;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use meson_core::config::ServerConfig;
use meson_core::{serve_connection, InstructionRegistry, Transport};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    /// Instructions served on every connection
    pub registry: Arc<InstructionRegistry>,
}

/// Health check handler.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "instructions": state.registry.len(),
    }))
}

/// Upgrade to a WebSocket and serve it as one pipeline connection.
pub async fn handle_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    debug!("WebSocket upgrade from {}", peer);
    let registry = state.registry.clone();

    ws.on_upgrade(move |socket| async move {
        let transport: Arc<dyn Transport> =
            Arc::new(WebSocketTransport::from_axum(socket, peer.to_string()));
        match serve_connection(transport, registry).await {
            Ok(which) => debug!("WebSocket {} ended on the {} loop", peer, which),
            Err(e) => warn!("WebSocket {} failed: {}", peer, e),
        }
    })
}

/// Build the router.
pub fn router(registry: Arc<InstructionRegistry>) -> Router {
    let state = Arc::new(AppState { registry });

    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(ServerConfig::HEALTH_PATH, get(handle_health))
        .route(ServerConfig::WEBSOCKET_PATH, get(handle_ws))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP/WebSocket server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    registry: Arc<InstructionRegistry>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = router(registry);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
