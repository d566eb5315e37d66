//! Shared fixtures for the integration test suite.
//!
//! Every test in this suite needs a reachable Redis instance to exercise
//! the bus (`fleetctl`'s whole design routes state through Redis, so there
//! is no in-process fake for it). Rather than fail the whole suite when no
//! broker is running, each test asks for one through [`connect_test_bus`]
//! and skips itself if the connection attempt doesn't succeed quickly.

use fleetctl::api::state::ApiState;
use fleetctl::bus::Bus;
use fleetctl::lifecycle::agent::AgentManager;
use fleetctl::lifecycle::coordinator::LifecycleCoordinator;
use fleetctl::status::StatusStore;
use fleetctl::store::AgentConfigRepo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub fn redis_url() -> String {
    std::env::var("FLEETCTL_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Connects to the test Redis instance with a short timeout. Returns `None`
/// (rather than panicking) when no broker answers, so the suite degrades
/// gracefully on a machine with no Redis running.
pub async fn connect_test_bus() -> Option<Bus> {
    match tokio::time::timeout(Duration::from_millis(500), Bus::connect(&redis_url())).await {
        Ok(Ok(bus)) => Some(bus),
        _ => None,
    }
}

pub struct Harness {
    pub bus: Bus,
    pub status: Arc<StatusStore>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub agents: Arc<AgentManager>,
    pub repo: AgentConfigRepo,
}

impl Harness {
    pub async fn build(bus: Bus) -> Harness {
        let repo = AgentConfigRepo::connect_in_memory()
            .await
            .expect("in-memory sqlite must be available in tests");
        let status = Arc::new(StatusStore::new(bus.clone()));
        let coordinator = Arc::new(LifecycleCoordinator::new(Arc::clone(&status)));
        let agents = Arc::new(AgentManager::new(Arc::clone(&status)));
        Harness {
            bus,
            status,
            coordinator,
            agents,
            repo,
        }
    }

    pub fn api_state(&self) -> Arc<ApiState> {
        Arc::new(ApiState::new(
            self.repo.clone(),
            Arc::clone(&self.status),
            Arc::clone(&self.coordinator),
            self.bus.clone(),
        ))
    }
}

/// Starts the real Control Plane HTTP server bound to an ephemeral port.
/// Returns the bound address, a shutdown sender the test should fire before
/// dropping the harness, and the serving task.
pub async fn start_server(
    state: Arc<ApiState>,
) -> (SocketAddr, tokio::sync::watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = tokio::sync::watch::channel(false);
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (handle, addr) = fleetctl::api::server::start_http_server(bind, state, rx)
        .await
        .expect("control plane must bind to an ephemeral port");
    (addr, tx, handle)
}

/// A process-free argv any test can use as a `SpawnSpec`'s program: exits
/// immediately with status 0, standing in for a real `agent-worker`.
pub fn quick_exit_argv() -> Vec<String> {
    vec!["true".to_string()]
}

/// An argv for a process that stays alive until killed, standing in for a
/// real `agent-worker` in the scenarios that need a live PID to observe.
pub fn long_lived_argv(seconds: u32) -> Vec<String> {
    vec!["sleep".to_string(), seconds.to_string()]
}
