use crate::cluster::ClusterManager;
use crate::error::{ExporterError, Result};
use crate::export::prometheus::{CONTENT_TYPE, PrometheusExporter};
use crate::metrics::registry::MetricsRegistry;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Clone)]
struct AppState {
    prometheus: PrometheusExporter,
    registry: Arc<MetricsRegistry>,
    manager: Arc<ClusterManager>,
    /// Run a cycle before rendering `/metrics`.
    collect_on_scrape: bool,
}

pub struct HttpServer {
    host: String,
    port: u16,
    state: AppState,
}

impl HttpServer {
    pub fn new(
        host: &str,
        port: u16,
        prometheus: PrometheusExporter,
        registry: Arc<MetricsRegistry>,
        manager: Arc<ClusterManager>,
        collect_on_scrape: bool,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            state: AppState {
                prometheus,
                registry,
                manager,
                collect_on_scrape,
            },
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let app = router(self.state);

        // Host names are resolved here, not parsed as a literal address
        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                ExporterError::Http(format!("Failed to bind {}:{}: {e}", self.host, self.port))
            })?;

        let addr = listener.local_addr()?;
        info!(addr = %addr, "Starting HTTP server");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| ExporterError::Http(e.to_string()))?;

        Ok(())
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .route("/", get(root_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    if state.collect_on_scrape {
        let outcome = state.manager.collect().await;
        debug!(outcome = outcome.as_str(), "Scrape-triggered collection finished");
    }

    let metrics = state.prometheus.render_metrics();
    (StatusCode::OK, [("content-type", CONTENT_TYPE)], metrics).into_response()
}

async fn health_handler(State(state): State<AppState>) -> Response {
    if state.registry.is_healthy() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Unhealthy").into_response()
    }
}

async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.registry.last_update_timestamp().is_some() {
        (StatusCode::OK, "Ready").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Not ready - no successful collection yet",
        )
            .into_response()
    }
}

/// Response body for the /status endpoint.
#[derive(Serialize)]
struct StatusResponse {
    state: &'static str,
    healthy: bool,
    consecutive_errors: u32,
    label_sets: usize,
    last_update_timestamp: Option<u64>,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.manager.state().as_str(),
        healthy: state.registry.is_healthy(),
        consecutive_errors: state.manager.consecutive_errors(),
        label_sets: state.registry.label_set_count(),
        last_update_timestamp: state.registry.last_update_timestamp(),
    })
}

async fn root_handler() -> Response {
    let html = r#"<!DOCTYPE html>
<html>
<head><title>Kafka Offset Exporter</title></head>
<body>
<h1>Kafka Offset Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/health">Health</a></p>
<p><a href="/ready">Ready</a></p>
<p><a href="/status">Status</a></p>
</body>
</html>"#;

    (
        StatusCode::OK,
        [("content-type", "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}
