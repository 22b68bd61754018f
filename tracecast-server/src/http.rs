//! Tracecast HTTP API
//!
//! Axum server exposing the viewer WebSocket and the control endpoints.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, Value)`, so the inner functions can be tested
//! without going through axum dispatch.
//!
//! Endpoints:
//! - GET  /ws             : viewer WebSocket (snapshot, deltas, log lines)
//! - POST /run-simulation : launch the simulator
//! - POST /clear-trace    : delete the trace file and reset viewers
//! - GET  /status         : event, session and simulation counters
//! - GET  /health         : liveness of the service loop
//! - GET  /version        : server version info

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracecast_core::TracecastConfig;

use crate::service::{ServiceError, ServiceHandle};
use crate::subsystems::runner::StartError;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub service: ServiceHandle,
    pub config: TracecastConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/ws", get(crate::ws::ws_handler))
        .route("/run-simulation", post(run_simulation_handler))
        .route("/clear-trace", post(clear_trace_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    service: ServiceHandle,
    config: TracecastConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { service, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Tracecast HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// Body of POST /run-simulation. Missing paths fall back to the configured defaults.
#[derive(Debug, Deserialize, Default)]
pub struct SimulationRequest {
    pub config_file: Option<String>,
    pub core_config_file: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error,
            "status": self.status,
        })
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Decode the POST /run-simulation body. Only an empty body means "use the
/// defaults"; a body that does not decode is rejected as a whole.
pub fn parse_simulation_request(
    body: &[u8],
) -> Result<SimulationRequest, (StatusCode, serde_json::Value)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SimulationRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        let status = if e.is_data() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::BAD_REQUEST
        };
        (
            status,
            ErrorResponse::new(format!("Invalid request body: {}", e)).into_value(),
        )
    })
}

/// Inner run-simulation: resolves default paths and asks the runner to start.
pub async fn run_simulation_inner(
    service: &ServiceHandle,
    config: &TracecastConfig,
    req: SimulationRequest,
) -> (StatusCode, serde_json::Value) {
    let config_file = req
        .config_file
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| config.simulator.default_config_file.clone());
    let core_config_file = req
        .core_config_file
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| config.simulator.default_core_config_file.clone());

    match service.start_simulation(config_file, core_config_file).await {
        Ok(pid) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "success",
                "message": "Simulation started",
                "pid": pid,
            }),
        ),
        Err(e) => {
            let status = match &e {
                ServiceError::Start(StartError::AlreadyRunning(_)) => StatusCode::CONFLICT,
                ServiceError::Start(StartError::ExecutableMissing(_)) => StatusCode::NOT_FOUND,
                ServiceError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, ErrorResponse::new(e.to_string()).into_value())
        }
    }
}

/// Inner clear-trace: deletes the trace file and notifies every viewer.
pub async fn clear_trace_inner(service: &ServiceHandle) -> (StatusCode, serde_json::Value) {
    match service.clear_trace().await {
        Ok(()) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "success",
                "message": "Trace cleared",
            }),
        ),
        Err(ServiceError::Stopped) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new(ServiceError::Stopped.to_string()).into_value(),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new(e.to_string()).into_value(),
        ),
    }
}

pub async fn status_inner(service: &ServiceHandle) -> (StatusCode, serde_json::Value) {
    match service.status().await {
        Ok(status) => match serde_json::to_value(&status) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(e.to_string()).into_value(),
            ),
        },
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new(e.to_string()).into_value(),
        ),
    }
}

/// Inner health check: the service loop answers a status request.
pub async fn health_inner(service: &ServiceHandle) -> (StatusCode, serde_json::Value) {
    match service.status().await {
        Ok(status) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "trace_path": status.trace_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "tracecast/1",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn run_simulation_handler(
    State(state): State<Arc<HttpState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = match parse_simulation_request(&body) {
        Ok(req) => run_simulation_inner(&state.service, &state.config, req).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

pub async fn clear_trace_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = clear_trace_inner(&state.service).await;
    (status, Json(body))
}

pub async fn status_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = status_inner(&state.service).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.service).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}
