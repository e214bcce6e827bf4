//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring. They bypass the
//! filter chain.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::network::LifecycleState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub server: String,
    pub state: &'static str,
    pub in_flight: u64,
    pub uptime_secs: u64,
}

/// Returns detailed health information as JSON.
///
/// Always returns 200; the `state` field reports the lifecycle state.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let lifecycle = state.server.lifecycle();
    Json(HealthReport {
        server: state.server.config().name.clone(),
        state: lifecycle.state().as_str(),
        in_flight: lifecycle.in_flight_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Liveness probe: always 200 while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only in `Ready`, 503 during startup, shutdown and
/// after stop.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.server.state() == LifecycleState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
