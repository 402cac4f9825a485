//! `ParleyServer`: axum HTTP + WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use parley_core::UserId;
use parley_core::collab::{
    AuthValidator, IdentityLookup, MembershipResolver, MessageStore, PubSubTransport,
};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health;
use crate::hub::{HubHandle, HubStats};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::run_ws_session;

/// External collaborators the relay calls into.
#[derive(Clone)]
pub struct Services {
    /// Bearer credential validation.
    pub auth: Arc<dyn AuthValidator>,
    /// Durable message storage.
    pub store: Arc<dyn MessageStore>,
    /// Group membership answers.
    pub membership: Arc<dyn MembershipResolver>,
    /// Display names.
    pub identity: Arc<dyn IdentityLookup>,
    /// Shared cross-instance transport.
    pub transport: Arc<dyn PubSubTransport>,
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    hub: HubHandle,
    services: Services,
    config: ServerConfig,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The relay's HTTP listener.
pub struct ParleyServer {
    config: ServerConfig,
    hub: HubHandle,
    services: Services,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ParleyServer {
    /// Create a server in front of a running hub.
    pub fn new(config: ServerConfig, hub: HubHandle, services: Services) -> Self {
        Self {
            config,
            hub,
            services,
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            services: self.services.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serving
    /// task. Triggering [`shutdown`](Self::shutdown) first tells the hub to
    /// close every queue, so each session's write loop sends a Close frame,
    /// then stops accepting connections.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener =
            TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "parley server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let hub = self.hub.clone();
        let signal = async move {
            token.cancelled().await;
            if hub.shutdown().await.is_err() {
                debug!("hub already stopped");
            }
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server error");
            }
            info!("parley server stopped");
        });
        Ok((addr, handle))
    }

    /// The hub this server feeds.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
///
/// Credentials are checked before the upgrade is accepted, so an
/// unauthenticated caller never gets a socket.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user = match authenticate(state.services.auth.as_ref(), &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let AppState {
        hub,
        services,
        config,
        ..
    } = state;
    ws.max_message_size(config.max_frame_bytes)
        .on_upgrade(move |socket| run_ws_session(socket, user, hub, services, config))
}

async fn authenticate(auth: &dyn AuthValidator, headers: &HeaderMap) -> Result<UserId, Response> {
    let token = bearer_token(headers).map_err(unauthorized)?;
    auth.validate(token).await.map_err(|e| {
        warn!(error = %e, "rejected credential");
        unauthorized("invalid token")
    })
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("missing Authorization header")?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|t| !t.is_empty())
        .ok_or("invalid Authorization header")
}

fn unauthorized(message: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(health::health_check(state.start_time, stats)).into_response(),
        Err(_) => {
            let mut body = health::health_check(state.start_time, HubStats::default());
            body.status = "stopping";
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
    }
}
