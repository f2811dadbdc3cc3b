use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::{health::HealthError, metrics::registry, runtime::conf::ApiConf};

#[derive(Clone)]
pub struct HealthState {
    /// The XDP program is attached and its shared buffer is open.
    pub ebpf_loaded: Arc<AtomicBool>,
    /// The ingestion loop is draining the shared buffer.
    pub ingest_running: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            ebpf_loaded: Arc::new(AtomicBool::new(false)),
            ingest_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub async fn liveness_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let ebpf_loaded = state.ebpf_loaded.load(Ordering::Relaxed);
    let ingest_running = state.ingest_running.load(Ordering::Relaxed);

    // Alive until the loop has stopped after a successful attach.
    let is_alive = !ebpf_loaded || ingest_running;

    let status_code = if is_alive {
        StatusCode::OK
    } else {
        warn!(
            event.name = "health.liveness.failed",
            ebpf_loaded = %ebpf_loaded,
            ingest_running = %ingest_running,
            "liveness check failed"
        );
        StatusCode::SERVICE_UNAVAILABLE
    };

    debug!(
        event.name = "health.liveness.checked",
        http.response.status_code = status_code.as_u16(),
        "liveness check completed"
    );

    let body = Json(json!({
        "status": if is_alive { "ok" } else { "unavailable" },
        "checks": {
            "ebpf_loaded": ebpf_loaded,
            "ingest_running": ingest_running
        }
    }));

    (status_code, body)
}

pub async fn readiness_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let ebpf_loaded = state.ebpf_loaded.load(Ordering::Relaxed);
    let ingest_running = state.ingest_running.load(Ordering::Relaxed);
    let is_ready = ebpf_loaded && ingest_running;

    let status_code = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = Json(json!({
        "status": if is_ready { "ok" } else { "unavailable" },
        "checks": {
            "ebpf_loaded": ebpf_loaded,
            "ingest_running": ingest_running
        },
        "metrics": {
            "packets_total": registry::INGEST_PACKETS_TOTAL.get(),
            "malformed_total": registry::INGEST_MALFORMED_TOTAL.get(),
            "read_errors_total": registry::INGEST_READ_ERRORS_TOTAL.get()
        }
    }));

    (status_code, body)
}

/// Returns Prometheus text format metrics for all registered collectors.
pub async fn metrics_handler() -> impl IntoResponse {
    match tokio::task::spawn_blocking(registry::gather_text).await {
        Ok(Ok(body)) => (StatusCode::OK, body),
        Ok(Err(e)) => {
            error!(
                event.name = "metrics.encode_failed",
                error.message = %e,
                "failed to encode metrics"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
        }
        Err(e) => {
            error!(
                event.name = "metrics.gather_failed",
                error.message = %e,
                "metrics gathering task panicked"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to gather metrics".to_string(),
            )
        }
    }
}

pub fn create_health_router(state: HealthState) -> Router {
    Router::new()
        .route("/livez", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_api_server(state: HealthState, config: &ApiConf) -> Result<(), HealthError> {
    if !config.enabled {
        info!(
            event.name = "api.disabled",
            "api server is disabled in configuration"
        );
        return Ok(());
    }

    let app = create_health_router(state);

    let bind_address = format!("{}:{}", config.listen_address, config.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(|e| HealthError::bind_address(&bind_address, e))?;

    info!(
        event.name = "api.started",
        net.listen.address = %bind_address,
        "api server has started"
    );
    axum::serve(listener, app)
        .await
        .map_err(HealthError::ServeError)?;
    Ok(())
}
