//! HTTP server setup: router assembly and graceful shutdown, grounded on
//! the teacher's `api/server.rs` — nested `/api`-free top-level router
//! here since there is no bundled frontend to fall back to, CORS wide
//! open, and `axum::serve(...).with_graceful_shutdown(...)` driven by a
//! `watch::Receiver<bool>`.

use super::state::ApiState;
use super::{agents, health, integrations, ws};

use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Binds and serves the Control Plane router. Returns the task driving the
/// server alongside the address it actually bound to (relevant when `bind`
/// asks for an ephemeral port, as tests do).
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/agents", get(agents::list_agents).post(agents::create_agent))
        .route(
            "/agents/{id}",
            get(agents::get_agent).put(agents::update_agent).delete(agents::delete_agent),
        )
        .route("/agents/{id}/config", get(agents::internal_agent_config))
        .route("/agents/{id}/start", post(agents::start_agent))
        .route("/agents/{id}/stop", post(agents::stop_agent))
        .route("/agents/{id}/restart", post(agents::restart_agent))
        .route("/agents/{id}/status", get(agents::agent_status))
        .route(
            "/agents/{id}/integrations/{type}/start",
            post(integrations::start_integration),
        )
        .route(
            "/agents/{id}/integrations/{type}/stop",
            post(integrations::stop_integration),
        )
        .route(
            "/agents/{id}/integrations/{type}/restart",
            post(integrations::restart_integration),
        )
        .route(
            "/agents/{id}/integrations/{type}/status",
            get(integrations::integration_status),
        )
        .route("/ws/agents/{id}", get(ws::ws_agent))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "control plane listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "control plane HTTP server exited with error");
        }
    });

    Ok((handle, local_addr))
}
