//! Integration lifecycle and status handlers — the same shape as
//! [`super::agents`], keyed additionally by integration type.

use super::state::ApiState;
use crate::error::{Error, Result};
use crate::lifecycle::integration::is_known_integration;
use crate::lifecycle::manager::StepOutcome;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(super) struct IntegrationSettingsRequest {
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StopQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct LifecycleAcceptedResponse {
    outcome: StepOutcome,
    message: String,
}

fn check_known(integration_type: &str) -> Result<()> {
    if is_known_integration(integration_type) {
        Ok(())
    } else {
        Err(Error::UnknownIntegration(integration_type.to_string()))
    }
}

#[tracing::instrument(skip(state, request))]
pub(super) async fn start_integration(
    State(state): State<Arc<ApiState>>,
    Path((agent_id, integration_type)): Path<(String, String)>,
    Json(request): Json<IntegrationSettingsRequest>,
) -> Result<(StatusCode, Json<LifecycleAcceptedResponse>)> {
    check_known(&integration_type)?;
    if state.repo.get(&agent_id).await?.is_none() {
        return Err(Error::config_missing(agent_id));
    }
    let lock = state.agent_lock(&agent_id).await;
    let _guard = lock.lock().await;

    let settings = request.settings.as_ref().and_then(|v| serde_json::to_string(v).ok());
    let outcome = state
        .coordinator
        .integrations()
        .start(&integration_type, &agent_id, settings.as_deref())
        .await;
    accepted(outcome)
}

#[tracing::instrument(skip(state))]
pub(super) async fn stop_integration(
    State(state): State<Arc<ApiState>>,
    Path((agent_id, integration_type)): Path<(String, String)>,
    Query(query): Query<StopQuery>,
) -> Result<(StatusCode, Json<LifecycleAcceptedResponse>)> {
    check_known(&integration_type)?;
    let lock = state.agent_lock(&agent_id).await;
    let _guard = lock.lock().await;

    let outcome = state
        .coordinator
        .integrations()
        .stop(&integration_type, &agent_id, query.force)
        .await;
    accepted(outcome)
}

#[tracing::instrument(skip(state, request))]
pub(super) async fn restart_integration(
    State(state): State<Arc<ApiState>>,
    Path((agent_id, integration_type)): Path<(String, String)>,
    Json(request): Json<IntegrationSettingsRequest>,
) -> Result<(StatusCode, Json<LifecycleAcceptedResponse>)> {
    check_known(&integration_type)?;
    let lock = state.agent_lock(&agent_id).await;
    let _guard = lock.lock().await;

    let settings = request.settings.as_ref().and_then(|v| serde_json::to_string(v).ok());
    let outcome = state
        .coordinator
        .integrations()
        .restart(&integration_type, &agent_id, settings.as_deref())
        .await;
    accepted(outcome)
}

#[tracing::instrument(skip(state))]
pub(super) async fn integration_status(
    State(state): State<Arc<ApiState>>,
    Path((agent_id, integration_type)): Path<(String, String)>,
) -> Result<Json<crate::status::StatusRecord>> {
    check_known(&integration_type)?;
    let record = state
        .coordinator
        .integrations()
        .status(&integration_type, &agent_id)
        .await?;
    Ok(Json(record))
}

fn accepted(outcome: StepOutcome) -> Result<(StatusCode, Json<LifecycleAcceptedResponse>)> {
    let message = match &outcome {
        StepOutcome::Started { pid } => format!("start accepted, pid {pid}"),
        StepOutcome::AlreadyRunning => "already running".to_string(),
        StepOutcome::Stopped => "stopped".to_string(),
        StepOutcome::AlreadyStopped => "already stopped".to_string(),
        StepOutcome::Restarted { pid } => format!("restart accepted, pid {pid}"),
        StepOutcome::Error { detail } => format!("accepted but transitioned to error: {detail}"),
    };
    Ok((StatusCode::ACCEPTED, Json(LifecycleAcceptedResponse { outcome, message })))
}
