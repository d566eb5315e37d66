//! `GET /healthz` — reports bus and relational store reachability,
//! grounded in the teacher's `api/system.rs::health`/`status` route shape.

use super::state::ApiState;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    redis: bool,
    database: bool,
    uptime_seconds: u64,
}

#[tracing::instrument(skip(state))]
pub(super) async fn healthz(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<HealthResponse>) {
    let redis_ok = state.bus.hgetall("__healthz_probe__").await.is_ok();
    let database_ok = sqlx::query("SELECT 1").fetch_one(state.repo.pool()).await.is_ok();

    let status = if redis_ok && database_ok { "ok" } else { "degraded" };
    let code = if redis_ok && database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status,
            redis: redis_ok,
            database: database_ok,
            uptime_seconds: state.started_at.elapsed().as_secs(),
        }),
    )
}
