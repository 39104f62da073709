use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use reef_proto::{ClientIdentity, ConsoleBootstrap};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bridge::{Bridge, DownstreamSocket};
use crate::config::{Credential, RelayConfig};
use crate::error::BridgeError;
use crate::upstream::WsConnector;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: RelayConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let ws_path = state.config.ws_path.clone();
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/metrics", get(metrics_handler))
        .route(&ws_path, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address and serves until ctrl-c.
pub async fn serve(state: AppState) -> Result<()> {
    let listener = TcpListener::bind(state.config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", state.config.listen_addr))?;
    serve_on(listener, state, shutdown_signal()).await
}

pub async fn serve_on<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().context("listener has no local address")?;
    info!(
        listen_addr = %local_addr,
        ws_path = %state.config.ws_path,
        upstream = %state.config.upstream_url,
        "reef-relay listening"
    );
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")?;
    info!("reef-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn config_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    Json(bootstrap_document(&state.config, &headers))
}

/// Builds the console bootstrap. The WebSocket URL reuses the host the
/// request came in on so the console stays on the origin it loaded from.
pub fn bootstrap_document(config: &RelayConfig, headers: &HeaderMap) -> ConsoleBootstrap {
    let host = header_str(headers, header::HOST.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| config.listen_addr.to_string());
    let secure = header_str(headers, "x-forwarded-proto")
        .and_then(|value| value.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
    let scheme = if secure { "wss" } else { "ws" };

    ConsoleBootstrap {
        colonies: config.colonies.clone(),
        colony_name: config.colony_name.clone(),
        colony_prv_key: config.colony_prv_key.as_ref().map(|key| key.expose().to_owned()),
        executor_prv_key: config
            .executor_prv_key
            .as_ref()
            .map(Credential::expose)
            .map(str::to_owned),
        reconciler_ws_url: format!("{scheme}://{host}{}", config.ws_path),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = ClientIdentity::from_header(header_str(&headers, header::USER_AGENT.as_str()));
    let origin = header_str(&headers, header::ORIGIN.as_str()).map(str::to_owned);
    let peer = peer.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity, origin, peer))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    identity: ClientIdentity,
    origin: Option<String>,
    peer: Option<SocketAddr>,
) {
    let span = info_span!(
        "console",
        peer = ?peer,
        origin = origin.as_deref().unwrap_or("-")
    );
    let config = &state.config;
    let connector = WsConnector::new(config.upstream_url.clone(), config.connect_timeout);
    let bridge = Bridge::new(
        config.bridge_settings(),
        connector,
        identity,
        config.phantom_policy.clone(),
    );

    match bridge.run(DownstreamSocket::new(socket)).instrument(span).await {
        Ok(report) => debug!(
            session_id = %report.session_id,
            cause = ?report.cause,
            "bridge finished"
        ),
        Err(BridgeError::PhantomConnection) => debug!(?peer, "phantom connection discarded"),
        Err(err) => warn!(?peer, error = %err, "bridge failed"),
    }
}
