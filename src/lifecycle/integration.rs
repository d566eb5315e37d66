//! C5 — Integration Manager.
//!
//! A thin specialisation of the Lifecycle Manager for channel-adapter
//! processes, analogous to [`crate::lifecycle::agent`] but keyed by
//! integration type as well as agent id, and closed over the compile-time
//! set of known adapters rather than accepting an arbitrary string.

use crate::error::{Error, Result};
use crate::lifecycle::manager::{LifecycleManager, StepOutcome};
use crate::process::SpawnSpec;
use crate::status::{ProcessKey, StatusStore};
use std::sync::Arc;

/// The integrations this build knows how to run. This is
/// the closed, compile-time set: new channels require a new release, not a
/// runtime registration call.
pub const KNOWN_INTEGRATIONS: &[&str] = &["telegram", "whatsapp", "webchat"];

pub fn is_known_integration(integration_type: &str) -> bool {
    KNOWN_INTEGRATIONS.contains(&integration_type)
}

/// Build the `fleetctl integration-worker` command line for a given
/// (integration type, agent) pair.
pub fn integration_spawn_spec(
    integration_type: &str,
    agent_id: &str,
    settings_json: Option<&str>,
) -> SpawnSpec {
    let exe = std::env::current_exe().unwrap_or_else(|_| "fleetctl".into());
    let mut argv = vec![
        exe.to_string_lossy().into_owned(),
        "integration-worker".to_string(),
        "--integration-type".to_string(),
        integration_type.to_string(),
        "--agent-id".to_string(),
        agent_id.to_string(),
    ];
    if let Some(settings) = settings_json {
        argv.push("--integration-settings".to_string());
        argv.push(settings.to_string());
    }
    SpawnSpec {
        argv,
        working_dir: None,
        env: Vec::new(),
    }
}

pub struct IntegrationManager {
    manager: LifecycleManager,
}

impl IntegrationManager {
    pub fn new(status: Arc<StatusStore>) -> Self {
        Self {
            manager: LifecycleManager::new(status),
        }
    }

    pub fn status_store(&self) -> &Arc<StatusStore> {
        &self.manager.status
    }

    pub async fn start(
        &self,
        integration_type: &str,
        agent_id: &str,
        settings_json: Option<&str>,
    ) -> StepOutcome {
        if !is_known_integration(integration_type) {
            return StepOutcome::Error {
                detail: Error::UnknownIntegration(integration_type.to_string()).to_string(),
            };
        }
        let key = ProcessKey::integration(integration_type, agent_id);
        let spec = integration_spawn_spec(integration_type, agent_id, settings_json);
        self.manager.start(&key, &spec).await
    }

    pub async fn stop(&self, integration_type: &str, agent_id: &str, force: bool) -> StepOutcome {
        let key = ProcessKey::integration(integration_type, agent_id);
        self.manager.stop(&key, force).await
    }

    pub async fn restart(
        &self,
        integration_type: &str,
        agent_id: &str,
        settings_json: Option<&str>,
    ) -> StepOutcome {
        if !is_known_integration(integration_type) {
            return StepOutcome::Error {
                detail: Error::UnknownIntegration(integration_type.to_string()).to_string(),
            };
        }
        let key = ProcessKey::integration(integration_type, agent_id);
        let spec = integration_spawn_spec(integration_type, agent_id, settings_json);
        self.manager.restart(&key, &spec).await
    }

    pub async fn status(
        &self,
        integration_type: &str,
        agent_id: &str,
    ) -> Result<crate::status::StatusRecord> {
        let key = ProcessKey::integration(integration_type, agent_id);
        self.manager.status.get_or_stopped(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_integrations_are_recognised() {
        assert!(is_known_integration("telegram"));
        assert!(is_known_integration("whatsapp"));
        assert!(is_known_integration("webchat"));
        assert!(!is_known_integration("discord"));
    }

    #[test]
    fn spawn_spec_carries_integration_type_and_agent_id() {
        let spec = integration_spawn_spec("telegram", "a1", None);
        assert!(spec.argv.contains(&"--integration-type".to_string()));
        assert!(spec.argv.contains(&"telegram".to_string()));
        assert!(spec.argv.contains(&"--agent-id".to_string()));
        assert!(spec.argv.contains(&"a1".to_string()));
        assert!(!spec.argv.contains(&"--integration-settings".to_string()));
    }

    #[test]
    fn spawn_spec_carries_settings_when_provided() {
        let spec = integration_spawn_spec("webchat", "a1", Some(r#"{"k":"v"}"#));
        assert!(spec.argv.contains(&"--integration-settings".to_string()));
        assert!(spec.argv.contains(&r#"{"k":"v"}"#.to_string()));
    }
}
