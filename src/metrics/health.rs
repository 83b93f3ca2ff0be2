//! HTTP server for health probes, Prometheus metrics and queue snapshots

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "lobby-matchmaker";

#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state of the routes; without an app state every probe fails
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub app_state: Option<Arc<AppState>>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Serve until [`stop`](Self::stop) is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let listener = TcpListener::bind(addr).await?;
        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.create_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/queues", get(queues_handler))
            .route("/queues/{name}", get(queue_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }
        Ok(())
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "service": SERVICE_NAME, "error": "Service not initialized" })),
    )
        .into_response()
}

/// Degraded still serves traffic, so only unhealthy maps to 503
fn status_code(status: &HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn status_reply(check: &str, result: Result<HealthStatus>) -> Response {
    match result {
        Ok(status) => (
            status_code(&status),
            Json(json!({ "service": SERVICE_NAME, "check": check, "status": status })),
        )
            .into_response(),
        Err(e) => {
            error!("{} check failed: {}", check, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "service": SERVICE_NAME, "check": check, "status": HealthStatus::Unhealthy })),
            )
                .into_response()
        }
    }
}

async fn root_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let queues: Vec<String> = state
        .app_state
        .iter()
        .flat_map(|app| app.queues().map(|queue| queue.name().to_string()))
        .collect();

    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "queues": queues,
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/queues", "/queues/{name}"]
    }))
}

/// Full report: service and per-queue checks plus statistics
async fn health_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match HealthCheck::check(app_state).await {
        Ok(health) => (status_code(&health.status), Json(health)).into_response(),
        Err(e) => status_reply("health", Err(e)),
    }
}

/// Ready once every queue accepts searches
async fn ready_handler(State(state): State<HealthServerState>) -> Response {
    match state.app_state {
        Some(app_state) => status_reply("ready", HealthCheck::readiness_check(app_state).await),
        None => not_initialized(),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> Response {
    match state.app_state {
        Some(app_state) => status_reply("alive", HealthCheck::liveness_check(app_state).await),
        None => not_initialized(),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    match state.metrics_collector.encode_text() {
        Ok((content_type, body)) => {
            (StatusCode::OK, [("content-type", content_type)], body).into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn queues_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match app_state.queue_snapshots() {
        Ok(snapshots) => Json(json!({ "queues": snapshots })).into_response(),
        Err(e) => {
            error!("Failed to snapshot queues: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to snapshot queues" })),
            )
                .into_response()
        }
    }
}

async fn queue_handler(
    State(state): State<HealthServerState>,
    Path(name): Path<String>,
) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };
    debug!("Snapshot of queue {} requested", name);

    let Some(queue) = app_state.queue(&name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Unknown queue {}", name) })),
        )
            .into_response();
    };

    match queue.snapshot() {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            error!("Failed to snapshot queue {}: {}", name, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
