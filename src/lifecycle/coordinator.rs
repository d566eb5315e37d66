//! C6 — Lifecycle Coordinator.
//!
//! Sequences a coordinated start (agent first, then its enabled
//! integrations) and a coordinated stop (integrations first, then the
//! agent), so an integration never outlives the agent it feeds, and a
//! freshly started agent isn't handed traffic before it's had a chance to
//! come up. No retries: a failed step is reported and the coordinator moves
//! on to the remaining steps rather than aborting the whole batch.

use crate::lifecycle::agent::AgentManager;
use crate::lifecycle::integration::IntegrationManager;
use crate::lifecycle::manager::StepOutcome;
use crate::status::StatusStore;
use std::collections::HashMap;
use std::sync::Arc;

/// One enabled integration to bring up or tear down alongside an agent.
#[derive(Debug, Clone)]
pub struct IntegrationSpec {
    pub integration_type: String,
    pub settings_json: Option<String>,
}

/// Per-component outcome of a coordinated start or stop, keyed by a label
/// identifying which component the outcome belongs to (`"agent"` or
/// `"integration:{type}"`).
pub type OutcomeMap = HashMap<String, StepOutcome>;

pub struct LifecycleCoordinator {
    agents: AgentManager,
    integrations: IntegrationManager,
}

impl LifecycleCoordinator {
    pub fn new(status: Arc<StatusStore>) -> Self {
        Self {
            agents: AgentManager::new(Arc::clone(&status)),
            integrations: IntegrationManager::new(status),
        }
    }

    pub fn agents(&self) -> &AgentManager {
        &self.agents
    }

    pub fn integrations(&self) -> &IntegrationManager {
        &self.integrations
    }

    /// Start the agent; only if that succeeds do its enabled integrations
    /// get started in turn. An integration start failure does not stop the
    /// agent or skip the remaining integrations.
    pub async fn start_all(
        &self,
        agent_id: &str,
        agent_settings_json: Option<&str>,
        integrations: &[IntegrationSpec],
    ) -> OutcomeMap {
        let mut outcomes = OutcomeMap::new();
        let agent_outcome = self.agents.start(agent_id, agent_settings_json).await;
        let agent_ok = matches!(
            agent_outcome,
            StepOutcome::Started { .. } | StepOutcome::AlreadyRunning
        );
        outcomes.insert("agent".to_string(), agent_outcome);

        if agent_ok {
            for spec in integrations {
                let outcome = self
                    .integrations
                    .start(
                        &spec.integration_type,
                        agent_id,
                        spec.settings_json.as_deref(),
                    )
                    .await;
                outcomes.insert(format!("integration:{}", spec.integration_type), outcome);
            }
        }

        outcomes
    }

    /// Stop each enabled integration, then the agent. Runs in the opposite
    /// order from [`Self::start_all`] so nothing is left talking to a dead
    /// agent process.
    pub async fn stop_all(
        &self,
        agent_id: &str,
        integrations: &[IntegrationSpec],
        force: bool,
    ) -> OutcomeMap {
        let mut outcomes = OutcomeMap::new();

        for spec in integrations {
            let outcome = self
                .integrations
                .stop(&spec.integration_type, agent_id, force)
                .await;
            outcomes.insert(format!("integration:{}", spec.integration_type), outcome);
        }

        outcomes.insert("agent".to_string(), self.agents.stop(agent_id, force).await);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integration_spec_carries_optional_settings() {
        let spec = IntegrationSpec {
            integration_type: "telegram".to_string(),
            settings_json: None,
        };
        assert_eq!(spec.integration_type, "telegram");
        assert!(spec.settings_json.is_none());
    }
}
