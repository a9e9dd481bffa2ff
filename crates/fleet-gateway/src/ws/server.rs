//! Browser-facing WebSocket server.

use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::hub::StatusHub;
use crate::link::DeviceRegistry;
use crate::store::Store;
use crate::ws::handler;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Shared state for browser sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub hub: Arc<StatusHub>,
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<Store>,
}

/// Build the browser router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Bind and serve until the task is dropped.
pub async fn serve(state: AppState) -> Result<(), GatewayError> {
    let addr = state.config.browser_addr();
    let router = build_router(state);
    info!(addr = %addr, "Starting browser WebSocket server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Bind(e.to_string()))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| GatewayError::Bind(e.to_string()))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "fleet-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One browser session: seed the snapshots, register for the event stream,
/// and route inbound intents.
async fn handle_session(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Full snapshot first so the browser can rehydrate before deltas arrive
    for frame in state.hub.snapshot_frames() {
        let _ = tx.send(frame);
    }
    let session_id = state.hub.browsers().register(tx.clone());

    // Writer task: a slow socket only backs up this session's channel
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handler::handle_frame(&text, &tx, &state).await;
            }
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data) {
                    handler::handle_frame(&text, &tx, &state).await;
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Browser socket error");
                break;
            }
        }
    }

    state.hub.browsers().unregister(&session_id);
    writer.abort();
}
