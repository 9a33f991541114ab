//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to the audio-fusion services. Provides the
//! router construction and server startup functionality.

use std::sync::Arc;

use axum::{routing::get, Router};
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastHub;
use crate::config::Config;
use crate::haptics::HapticsClient;
use crate::protocol_constants::{DEFAULT_BIND_HOST, DEFAULT_BIND_PORT};
use crate::state::SharedAudioState;

pub mod conn_manager;
pub mod ws_esp32;
pub mod ws_events;
pub mod ws_stt;

pub use conn_manager::WsConnectionManager;

/// Errors that can occur when starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {0}:{1}: {2}")]
    Bind(String, u16, std::io::Error),
}

/// Shared application state for the API layer. A thin wrapper holding
/// references to the audio-fusion services; business logic lives in those
/// services, not here.
#[derive(Clone)]
pub struct AppState {
    pub audio: Arc<RwLock<SharedAudioState>>,
    pub config: Arc<RwLock<Config>>,
    pub hub: Arc<BroadcastHub>,
    pub events_ws: Arc<WsConnectionManager>,
    pub stt_ws: Arc<WsConnectionManager>,
    pub esp32_ws: Arc<WsConnectionManager>,
    pub haptics_left: Arc<HapticsClient>,
    pub haptics_right: Arc<HapticsClient>,
    pub sample_rate_hz: u32,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Connected `/events` + `/stt` client counts, for the status snapshot.
    pub fn connected_counts(&self) -> (usize, usize) {
        (self.events_ws.connection_count(), self.stt_ws.connection_count())
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(ws_events::handler))
        .route("/stt", get(ws_stt::handler))
        .route("/esp32/audio", get(ws_esp32::handler))
        .fallback(ws_esp32::unknown_path)
        .with_state(state)
}

/// Binds and serves the HUD server on `host:port` (default
/// `0.0.0.0:8765`), running until `state.shutdown` is cancelled.
pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<(), ServerError> {
    let host = if host.is_empty() { DEFAULT_BIND_HOST } else { host };
    let port = if port == 0 { DEFAULT_BIND_PORT } else { port };
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Bind(host.to_string(), port, e))?;
    log::info!("[Server] Listening on ws://{}", addr);

    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ServerError::Bind(host.to_string(), port, e))?;
    Ok(())
}
