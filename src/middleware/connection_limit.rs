//! Connection limit middleware for the audio WebSocket endpoint
//!
//! Enforces the global WebSocket connection cap and the per-IP cap before the
//! upgrade happens, so a refused client gets a plain HTTP status instead of a
//! socket that closes immediately.
//!
//! An accepted upgrade carries a [`ConnectionSlot`] in its request
//! extensions. The slot is released when its last clone drops: when the
//! socket ends, or as soon as the request is answered if the upgrade fails.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use transcribe_relay::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/ws-audio", get(ws_audio_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError, ConnectionSlot};

/// Middleware that enforces connection limits for WebSocket upgrades.
///
/// - 503 Service Unavailable when the global limit is reached
/// - 429 Too Many Requests when the per-IP limit is reached
///
/// Requests without an `Upgrade: websocket` header pass through untouched.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match ConnectionSlot::acquire(&state, client_ip) {
        Ok(slot) => {
            request.extensions_mut().insert(slot);
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}
