//! Audio WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_audio_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the audio WebSocket router
///
/// # Endpoint
///
/// `GET /ws-audio` - WebSocket upgrade for audio relay
///
/// # Example
///
/// ```json
/// // Client sends
/// {"type": "audio", "payload": "QUJD"}
///
/// // Server responds with one text frame per result
/// partial: Hello
/// partial: Hello world
/// final: Hello world (simulated)
/// ```
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws-audio", get(ws_audio_handler))
        .layer(TraceLayer::new_for_http())
}
