pub mod ws;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::handlers::api::health_check;
use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

/// Public health route plus the connection-limited audio WebSocket route.
///
/// The router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the connection
/// limit middleware can see the client address.
pub fn create_app_router(state: Arc<AppState>) -> Router {
    let ws_routes = ws::create_ws_router().layer(middleware::from_fn_with_state(
        state.clone(),
        connection_limit_middleware,
    ));

    let public_routes = Router::new().route("/", axum::routing::get(health_check));

    public_routes.merge(ws_routes).with_state(state)
}
