//! Agent configuration and lifecycle handlers.

use super::state::ApiState;
use crate::bus::{ControlCommand, ControlEnvelope, control_channel};
use crate::error::{Error, Result};
use crate::lifecycle::manager::StepOutcome;
use crate::status::{ProcessKey, StatusKind};
use crate::store::{AgentConfig, AgentConfigInput};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Grace period the delete handler waits after publishing `shutdown`
/// before it tears down the configuration row and status keys.
const DELETE_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
pub(super) struct AgentConfigRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "config")]
    pub config_json: serde_json::Value,
}

impl From<AgentConfigRequest> for AgentConfigInput {
    fn from(value: AgentConfigRequest) -> Self {
        AgentConfigInput {
            name: value.name,
            description: value.description,
            user_id: value.user_id,
            config_json: value.config_json,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct AgentConfigResponse {
    id: String,
    name: String,
    description: Option<String>,
    #[serde(rename = "userId")]
    user_id: String,
    config: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<AgentConfig> for AgentConfigResponse {
    fn from(value: AgentConfig) -> Self {
        Self {
            id: value.id,
            name: value.name,
            description: value.description,
            user_id: value.user_id,
            config: value.config_json,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct AgentListItem {
    id: String,
    name: String,
    description: Option<String>,
    status: String,
}

#[derive(Debug, Serialize)]
pub(super) struct LifecycleAcceptedResponse {
    outcome: StepOutcome,
    message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct StopQuery {
    #[serde(default)]
    force: bool,
}

fn generate_agent_id(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let suffix: u64 = rand::random();
    format!("agent_{slug}_{suffix:08x}")
}

#[tracing::instrument(skip(state, request))]
pub(super) async fn create_agent(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AgentConfigRequest>,
) -> Result<(StatusCode, Json<AgentConfigResponse>)> {
    let agent_id = generate_agent_id(&request.name);
    let input: AgentConfigInput = request.into();
    let config = state.repo.create(&agent_id, &input).await?;

    let key = ProcessKey::agent(&agent_id);
    state
        .status
        .set_fields(&key, crate::status::StatusUpdate::status(StatusKind::Stopped))
        .await?;

    Ok((StatusCode::CREATED, Json(config.into())))
}

#[tracing::instrument(skip(state))]
pub(super) async fn list_agents(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<AgentListItem>>> {
    let configs = state.repo.list().await?;
    let mut items = Vec::with_capacity(configs.len());
    for config in configs {
        let record = state
            .status
            .get_or_stopped(&ProcessKey::agent(&config.id))
            .await?;
        items.push(AgentListItem {
            id: config.id,
            name: config.name,
            description: config.description,
            status: record.status.to_string(),
        });
    }
    Ok(Json(items))
}

#[tracing::instrument(skip(state))]
pub(super) async fn get_agent(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentConfigResponse>> {
    let config = state
        .repo
        .get(&agent_id)
        .await?
        .ok_or_else(|| Error::config_missing(agent_id.clone()))?;
    Ok(Json(config.into()))
}

/// Internal endpoint a freshly spawned child calls to fetch its own
/// effective configuration.
#[tracing::instrument(skip(state))]
pub(super) async fn internal_agent_config(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let config = state
        .repo
        .get(&agent_id)
        .await?
        .ok_or_else(|| Error::config_missing(agent_id.clone()))?;
    Ok(Json(serde_json::json!({
        "agent_id": config.id,
        "settings": config.config_json,
    })))
}

#[tracing::instrument(skip(state, request))]
pub(super) async fn update_agent(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
    Json(request): Json<AgentConfigRequest>,
) -> Result<Json<AgentConfigResponse>> {
    let input: AgentConfigInput = request.into();
    let config = state
        .repo
        .update(&agent_id, &input)
        .await?
        .ok_or_else(|| Error::config_missing(agent_id.clone()))?;

    let record = state.status.get(&ProcessKey::agent(&agent_id)).await?;
    if matches!(
        record.status,
        StatusKind::Running | StatusKind::Starting | StatusKind::Initializing
    ) {
        let envelope = ControlEnvelope { command: ControlCommand::Restart };
        state.bus.publish_json(&control_channel(&agent_id), &envelope).await?;
    }

    Ok(Json(config.into()))
}

#[tracing::instrument(skip(state))]
pub(super) async fn delete_agent(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode> {
    if state.repo.get(&agent_id).await?.is_none() {
        // Boundary behaviour: 404, but still purge any orphaned status key.
        state.status.delete(&ProcessKey::agent(&agent_id)).await?;
        return Err(Error::config_missing(agent_id));
    }

    let record = state.status.get(&ProcessKey::agent(&agent_id)).await?;
    if matches!(
        record.status,
        StatusKind::Running | StatusKind::Starting | StatusKind::Initializing
    ) {
        let envelope = ControlEnvelope { command: ControlCommand::Shutdown };
        state.bus.publish_json(&control_channel(&agent_id), &envelope).await?;
        tokio::time::sleep(DELETE_GRACE_PERIOD).await;
    }

    state.repo.delete(&agent_id).await?;
    state.status.delete(&ProcessKey::agent(&agent_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
pub(super) async fn start_agent(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Result<(StatusCode, Json<LifecycleAcceptedResponse>)> {
    let config = state
        .repo
        .get(&agent_id)
        .await?
        .ok_or_else(|| Error::config_missing(agent_id.clone()))?;
    let lock = state.agent_lock(&agent_id).await;
    let _guard = lock.lock().await;

    let settings = serde_json::to_string(&config.config_json).ok();
    let outcome = state.coordinator.agents().start(&agent_id, settings.as_deref()).await;
    accepted(outcome)
}

#[tracing::instrument(skip(state))]
pub(super) async fn stop_agent(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<(StatusCode, Json<LifecycleAcceptedResponse>)> {
    let lock = state.agent_lock(&agent_id).await;
    let _guard = lock.lock().await;

    let outcome = state.coordinator.agents().stop(&agent_id, query.force).await;
    accepted(outcome)
}

#[tracing::instrument(skip(state))]
pub(super) async fn restart_agent(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Result<(StatusCode, Json<LifecycleAcceptedResponse>)> {
    let config = state
        .repo
        .get(&agent_id)
        .await?
        .ok_or_else(|| Error::config_missing(agent_id.clone()))?;
    let lock = state.agent_lock(&agent_id).await;
    let _guard = lock.lock().await;

    let settings = serde_json::to_string(&config.config_json).ok();
    let outcome = state.coordinator.agents().restart(&agent_id, settings.as_deref()).await;
    accepted(outcome)
}

#[tracing::instrument(skip(state))]
pub(super) async fn agent_status(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<crate::status::StatusRecord>> {
    if state.repo.get(&agent_id).await?.is_none() {
        return Err(Error::config_missing(agent_id));
    }
    let record = state.coordinator.agents().status(&agent_id).await?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_agent_ids_are_slugified_and_unique_enough() {
        let a = generate_agent_id("My Assistant");
        let b = generate_agent_id("My Assistant");
        assert!(a.starts_with("agent_my_assistant_"));
        assert_ne!(a, b);
    }
}
