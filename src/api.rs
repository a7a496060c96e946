// src/api.rs
//! HTTP status surface: `/health`, `/status`, and `/metrics` when a
//! Prometheus handle is installed.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;

use crate::history::{StatusBoard, StatusSnapshot};
use crate::shutdown::Shutdown;
use crate::subscribers::SubscriberRegistry;

const RECENT_CYCLES: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub status: Arc<StatusBoard>,
    pub registry: Arc<SubscriberRegistry>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status));

    if state.metrics.is_some() {
        app = app.route("/metrics", get(metrics));
    }

    app.layer(CorsLayer::very_permissive()).with_state(state)
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusSnapshot>, (StatusCode, String)> {
    let active = state
        .registry
        .active_count()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(state.status.snapshot(active, RECENT_CYCLES)))
}

async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|h| h.render())
        .ok_or(StatusCode::NOT_FOUND)
}

/// Serve `app` on `addr` until shutdown fires.
pub async fn serve(addr: SocketAddr, app: Router, mut shutdown: Shutdown) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(target: "api", %addr, "status server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("status server")
}
