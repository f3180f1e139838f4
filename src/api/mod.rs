//! HTTP API server for the live voice relay

pub mod health;
pub mod live;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::{Config, ServerConfig};
use crate::protocol::RelayReply;
use crate::relay::LiveRelay;

pub use rate_limit::SharedLimiter;

/// Shared state for API handlers
pub struct ApiState {
    pub relay: Arc<LiveRelay>,
    pub limiter: SharedLimiter,
}

/// JSON error response, `{"error":{"code","message"}}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
}

impl ApiError {
    #[must_use]
    pub const fn rate_limited() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: "rate_limited",
            message: "Too many voice sessions. Please wait a moment.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(RelayReply::error(self.code, self.message))).into_response()
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    server: ServerConfig,
}

impl ApiServer {
    /// Build the server, taking ownership of the upstream credential
    #[must_use]
    pub fn new(config: Config) -> Self {
        let limiter = rate_limit::create_limiter(config.server.sessions_per_minute);
        let relay = Arc::new(LiveRelay::new(config.upstream, config.assistant));

        Self {
            state: Arc::new(ApiState { relay, limiter }),
            server: config.server,
        }
    }

    /// CORS for the configured storefront origins, with credentials
    fn cors(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .server
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true)
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let router = Router::new()
            .nest("/api/ai", live::router(Arc::clone(&self.state)))
            .merge(health::router())
            .merge(health::ready_router(Arc::clone(&self.state)));

        router.layer(self.cors()).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.server.socket_addr())
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();

        if !self.state.relay.is_configured() {
            tracing::warn!("GEMINI_API_KEY is not set; live sessions will be rejected");
        }
        tracing::info!(addr = ?addr, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
