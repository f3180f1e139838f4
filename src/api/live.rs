//! Live voice WebSocket endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};

use super::{ApiError, ApiState};

/// Build live session router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/live", get(live_upgrade))
        .with_state(state)
}

/// Upgrade to a relayed live session, subject to the session rate limit
async fn live_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> Response {
    if state.limiter.check().is_err() {
        tracing::warn!("live session rate limit exceeded");
        return ApiError::rate_limited().into_response();
    }

    let relay = Arc::clone(&state.relay);
    ws.on_upgrade(move |socket| async move { relay.serve(socket).await })
}
