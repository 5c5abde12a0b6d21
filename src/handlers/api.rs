use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub provider: &'static str,
    pub active_sessions: usize,
}

/// Health check handler
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_sessions = state.relay.registry().len();
    debug!(active_sessions, "Health check");
    Json(HealthResponse {
        status: "OK",
        provider: state.relay.provider_name(),
        active_sessions,
    })
}
