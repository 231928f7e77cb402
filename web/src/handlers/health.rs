//! Liveness and readiness probes.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use booking_runtime::health::{check_parked_queue, check_store, HealthReport};

/// Liveness: the process is up. Dependencies are not checked.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: the booking store answers and the parked backlog is sane.
///
/// Answers 503 only when a check is unhealthy; a degraded backlog still
/// takes webhooks.
///
/// ```json
/// {
///   "status": "healthy",
///   "checks": [{ "component": "booking_store", "status": "healthy", "latency_ms": 2 }],
///   "checked_at": "2025-01-01T00:00:00Z"
/// }
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let services = state.coordinator.services();
    let checks = vec![
        check_store(services.store.as_ref()).await,
        check_parked_queue(services.pending.as_ref(), state.parked_threshold).await,
    ];
    let report = HealthReport::new(checks, services.clock.now());

    let status = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}
