// SPDX-License-Identifier: Apache-2.0
//! HTTP/WS listener: `/health`, `/ws`, `/metrics` (spec §4.F + supplemented
//! features). Runs entirely on the dedicated single-threaded reactor (spec
//! §5); never touches physics state directly — only through [`Engine`]'s
//! lock-free cross-thread surface and [`SessionSet`]'s registration API.

use crate::engine::Engine;
use crate::session::{self, SessionSet};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Shared state reachable by every request handler.
pub struct AppState {
    engine: Arc<Engine>,
    sessions: Arc<SessionSet>,
    allow_origins: Option<HashSet<String>>,
    max_queue: usize,
    /// Fires once when the process begins graceful shutdown; cloned into
    /// every session so its writer can send a real close frame (spec §8
    /// scenario 6) instead of being cut off by the reactor tearing down.
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
    start: Instant,
    total_connections: AtomicU64,
    rejected_origins: AtomicU64,
}

impl AppState {
    /// Build shared application state.
    pub fn new(
        engine: Arc<Engine>,
        sessions: Arc<SessionSet>,
        allow_origins: Option<HashSet<String>>,
        max_queue: usize,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            sessions,
            allow_origins,
            max_queue,
            shutdown_rx,
            start: Instant::now(),
            total_connections: AtomicU64::new(0),
            rejected_origins: AtomicU64::new(0),
        }
    }
}

/// Build the router: `/health`, `/ws`, `/metrics`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::SERVER, HeaderValue::from_static("DigitalTwin/1.0"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    (StatusCode::OK, headers, "ok")
}

fn origin_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(allow) = &state.allow_origins else {
        return true;
    };
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|origin| allow.contains(origin))
        .unwrap_or(false)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !origin_allowed(&state, &headers) {
        state.rejected_origins.fetch_add(1, Ordering::Relaxed);
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<missing>");
        warn!(?peer, origin, "origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }
    state.total_connections.fetch_add(1, Ordering::Relaxed);
    let engine = state.engine.clone();
    let sessions = state.sessions.clone();
    let max_queue = state.max_queue;
    let shutdown_rx = state.shutdown_rx.clone();
    ws.on_upgrade(move |socket| async move {
        session::handle_socket(socket, engine, sessions, peer, max_queue, shutdown_rx).await
    })
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    uptime_ms: u64,
    active_connections: usize,
    total_connections: u64,
    rejected_origins: u64,
    rpm: f64,
    rpm_target: f64,
    angle_rad: f64,
    stress_factor: f64,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    let body = MetricsResponse {
        uptime_ms: state.start.elapsed().as_millis() as u64,
        active_connections: state.sessions.len(),
        total_connections: state.total_connections.load(Ordering::Relaxed),
        rejected_origins: state.rejected_origins.load(Ordering::Relaxed),
        rpm: snapshot.rpm,
        rpm_target: state.engine.rpm_target(),
        angle_rad: snapshot.angle_rad,
        stress_factor: snapshot.stress_factor,
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, max-age=0"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    (headers, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_origins(origins: Option<&[&str]>) -> AppState {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        AppState::new(
            Arc::new(Engine::new(1200.0, 1000)),
            Arc::new(SessionSet::new()),
            origins.map(|o| o.iter().map(|s| s.to_string()).collect()),
            3,
            rx,
        )
    }

    #[test]
    fn accept_all_when_no_allow_list_configured() {
        let state = state_with_origins(None);
        let headers = HeaderMap::new();
        assert!(origin_allowed(&state, &headers));
    }

    #[test]
    fn rejects_missing_origin_header_when_list_configured() {
        let state = state_with_origins(Some(&["https://dash.example"]));
        let headers = HeaderMap::new();
        assert!(!origin_allowed(&state, &headers));
    }

    #[test]
    fn accepts_listed_origin_rejects_unlisted() {
        let state = state_with_origins(Some(&["https://dash.example"]));
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://dash.example"));
        assert!(origin_allowed(&state, &headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://evil.example"));
        assert!(!origin_allowed(&state, &headers));
    }
}
