use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use wb_dispatch::ExecutorStats;

use crate::model::{HealthCheckResponse, SimpleHealthResponse};
use crate::AppState;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = SimpleHealthResponse)
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> Json<SimpleHealthResponse> {
    let healthy = state.dispatcher.executor().is_running() && state.repos.ping().await.is_ok();

    let status = if healthy { "UP" } else { "DEGRADED" };

    Json(SimpleHealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Liveness - the process is up
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive", body = HealthCheckResponse)
    )
)]
pub async fn liveness() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "LIVE".to_string(),
    })
}

/// Readiness - database reachable and executor accepting work
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready", body = HealthCheckResponse),
        (status = 503, description = "Application is not ready", body = HealthCheckResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> Response {
    if let Err(e) = state.repos.ping().await {
        warn!(error = %e, "Readiness check: database unreachable");
        return not_ready();
    }
    if !state.dispatcher.executor().is_running() {
        return not_ready();
    }

    (
        StatusCode::OK,
        Json(HealthCheckResponse {
            status: "READY".to_string(),
        }),
    )
        .into_response()
}

fn not_ready() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthCheckResponse {
            status: "NOT_READY".to_string(),
        }),
    )
        .into_response()
}

/// Dispatch executor statistics
#[utoipa::path(
    get,
    path = "/monitoring/executor",
    tag = "monitoring",
    responses(
        (status = 200, description = "Executor statistics", body = ExecutorStats)
    )
)]
pub async fn executor_stats_handler(State(state): State<AppState>) -> Json<ExecutorStats> {
    let stats = state.dispatcher.executor().stats();
    wb_dispatch::metrics::set_executor_stats(&stats);
    Json(stats)
}

/// Prometheus metrics endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "monitoring",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain")
    )
)]
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let output = match &state.metrics {
        Some(handle) => handle.render(),
        None => String::new(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
        .into_response()
}
