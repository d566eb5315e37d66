//! Shared state handed to every Control Plane handler via `State<Arc<ApiState>>`,
//! grounded on the teacher's `api/state.rs` pattern of one struct bundling
//! every shared dependency a handler might need.

use crate::bus::Bus;
use crate::lifecycle::coordinator::LifecycleCoordinator;
use crate::status::StatusStore;
use crate::store::AgentConfigRepo;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

pub struct ApiState {
    pub repo: AgentConfigRepo,
    pub status: Arc<StatusStore>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub bus: Bus,
    pub started_at: std::time::Instant,
    /// Per-`agent_id` mutex so start/stop/restart requests against the same
    /// agent are serialised rather than racing each other.
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ApiState {
    pub fn new(
        repo: AgentConfigRepo,
        status: Arc<StatusStore>,
        coordinator: Arc<LifecycleCoordinator>,
        bus: Bus,
    ) -> Self {
        Self {
            repo,
            status,
            coordinator,
            bus,
            started_at: std::time::Instant::now(),
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Returns the mutex guarding lifecycle operations for one agent,
    /// creating it on first use.
    pub async fn agent_lock(&self, agent_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
