//! C1 — Status Store.
//!
//! Typed access to the per-process status hashes, with
//! PID-reconciliation-on-read: a record that claims to be alive but whose
//! PID the OS no longer recognises is rewritten to `error_process_lost`
//! before it is ever handed back to a caller.
//!
//! Grounded on `original_source/agent_manager/process_manager.py::get_agent_status`
//! (liveness probe + rewrite-on-read) and
//! `original_source/app/services/process_management/base.py` (hash
//! round-trip conventions: a field is "absent" when unset or empty).

use crate::bus::Bus;
use crate::error::Result;
use std::collections::HashMap;

/// Identifies which status hash a component refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessKey {
    Agent { agent_id: String },
    Integration {
        integration_type: String,
        agent_id: String,
    },
}

impl ProcessKey {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        ProcessKey::Agent {
            agent_id: agent_id.into(),
        }
    }

    pub fn integration(integration_type: impl Into<String>, agent_id: impl Into<String>) -> Self {
        ProcessKey::Integration {
            integration_type: integration_type.into(),
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            ProcessKey::Agent { agent_id } | ProcessKey::Integration { agent_id, .. } => agent_id,
        }
    }

    /// Human label used in log lines and `error_detail` prefixes.
    pub fn label(&self) -> String {
        match self {
            ProcessKey::Agent { agent_id } => format!("agent:{agent_id}"),
            ProcessKey::Integration {
                integration_type,
                agent_id,
            } => format!("integration:{integration_type}:{agent_id}"),
        }
    }

    fn redis_key(&self) -> String {
        match self {
            ProcessKey::Agent { agent_id } => crate::bus::agent_status_key(agent_id),
            ProcessKey::Integration {
                integration_type,
                agent_id,
            } => crate::bus::integration_status_key(integration_type, agent_id),
        }
    }

    fn legacy_redis_key(&self) -> Option<String> {
        match self {
            ProcessKey::Agent { agent_id } => {
                Some(crate::bus::legacy_agent_status_key(agent_id))
            }
            ProcessKey::Integration { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    NotFound,
    Stopped,
    Starting,
    Initializing,
    Running,
    Stopping,
    Error,
    ErrorProcessLost,
    ErrorStartFailed,
    ErrorStopFailed,
    Restarting,
}

impl StatusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::NotFound => "not_found",
            StatusKind::Stopped => "stopped",
            StatusKind::Starting => "starting",
            StatusKind::Initializing => "initializing",
            StatusKind::Running => "running",
            StatusKind::Stopping => "stopping",
            StatusKind::Error => "error",
            StatusKind::ErrorProcessLost => "error_process_lost",
            StatusKind::ErrorStartFailed => "error_start_failed",
            StatusKind::ErrorStopFailed => "error_stop_failed",
            StatusKind::Restarting => "restarting",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "not_found" => StatusKind::NotFound,
            "stopped" => StatusKind::Stopped,
            "starting" => StatusKind::Starting,
            "initializing" => StatusKind::Initializing,
            "running" => StatusKind::Running,
            "stopping" => StatusKind::Stopping,
            "error" => StatusKind::Error,
            "error_process_lost" => StatusKind::ErrorProcessLost,
            "error_start_failed" => StatusKind::ErrorStartFailed,
            "error_stop_failed" => StatusKind::ErrorStopFailed,
            "restarting" => StatusKind::Restarting,
            _ => return None,
        })
    }

    /// Whether a record in this state is expected to carry a live PID that
    /// must be reconciled against the OS on read.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            StatusKind::Starting
                | StatusKind::Initializing
                | StatusKind::Running
                | StatusKind::Stopping
                | StatusKind::Restarting
        )
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for StatusKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusRecord {
    pub status: StatusKind,
    pub pid: Option<u32>,
    pub last_active: Option<i64>,
    pub error_detail: Option<String>,
    pub start_attempt_utc: Option<String>,
}

impl StatusRecord {
    fn not_found() -> Self {
        Self {
            status: StatusKind::NotFound,
            pid: None,
            last_active: None,
            error_detail: None,
            start_attempt_utc: None,
        }
    }

    fn stopped() -> Self {
        Self {
            status: StatusKind::Stopped,
            pid: None,
            last_active: None,
            error_detail: None,
            start_attempt_utc: None,
        }
    }

    fn from_hash(map: &HashMap<String, String>) -> Option<Self> {
        if map.is_empty() {
            return None;
        }
        let status = map
            .get("status")
            .and_then(|s| StatusKind::from_str(s))
            .unwrap_or(StatusKind::Error);
        let pid = map
            .get("pid")
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse().ok());
        let last_active = map
            .get("last_active")
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok());
        let error_detail = map.get("error_detail").filter(|v| !v.is_empty()).cloned();
        let start_attempt_utc = map
            .get("start_attempt_utc")
            .filter(|v| !v.is_empty())
            .cloned();
        Some(Self {
            status,
            pid,
            last_active,
            error_detail,
            start_attempt_utc,
        })
    }
}

/// Fields a caller wants to set in one partial update.
#[derive(Debug, Default, Clone)]
pub struct StatusUpdate {
    pub status: Option<StatusKind>,
    pub pid: Option<u32>,
    pub last_active: Option<i64>,
    pub error_detail: Option<String>,
    pub start_attempt_utc: Option<String>,
}

impl StatusUpdate {
    pub fn status(status: StatusKind) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_last_active_now(mut self) -> Self {
        self.last_active = Some(chrono::Utc::now().timestamp());
        self
    }

    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_start_attempt_now(mut self) -> Self {
        self.start_attempt_utc = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    fn into_fields(self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(status) = self.status {
            fields.push(("status", status.as_str().to_string()));
        }
        if let Some(pid) = self.pid {
            fields.push(("pid", pid.to_string()));
        }
        if let Some(last_active) = self.last_active {
            fields.push(("last_active", last_active.to_string()));
        }
        if let Some(detail) = self.error_detail {
            fields.push(("error_detail", detail));
        }
        if let Some(attempt) = self.start_attempt_utc {
            fields.push(("start_attempt_utc", attempt));
        }
        fields
    }
}

/// Non-intrusive liveness probe (`kill(pid, 0)`), same primitive the
/// a process uses to check its own PID file.
pub fn is_pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

pub struct StatusStore {
    bus: Bus,
}

impl StatusStore {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    /// Read a status record, performing PID reconciliation before
    /// returning. A dead PID on a live-status record is rewritten to
    /// `error_process_lost` with the PID cleared before the value reaches
    /// the caller, so no observer ever sees a stale `running` record.
    pub async fn get(&self, key: &ProcessKey) -> Result<StatusRecord> {
        let map = self.bus.hgetall(&key.redis_key()).await?;
        let record = match StatusRecord::from_hash(&map) {
            Some(record) => record,
            None => match key.legacy_redis_key() {
                Some(legacy_key) => {
                    let legacy_map = self.bus.hgetall(&legacy_key).await?;
                    match StatusRecord::from_hash(&legacy_map) {
                        Some(record) => record,
                        None => return Ok(StatusRecord::not_found()),
                    }
                }
                None => return Ok(StatusRecord::not_found()),
            },
        };

        if record.status.is_live() {
            if let Some(pid) = record.pid {
                if !is_pid_alive(pid) {
                    let reconciled = StatusUpdate::status(StatusKind::ErrorProcessLost)
                        .with_error_detail(format!("pid {pid} is no longer running"));
                    self.set_fields(key, reconciled).await?;
                    self.clear_pid(key).await?;
                    return Ok(StatusRecord {
                        status: StatusKind::ErrorProcessLost,
                        pid: None,
                        last_active: record.last_active,
                        error_detail: Some(format!("pid {pid} is no longer running")),
                        start_attempt_utc: record.start_attempt_utc,
                    });
                }
            }
        }

        Ok(record)
    }

    /// Convenience wrapper matching the boundary rule: config present but no
    /// status key yields `stopped`, never `not_found`.
    pub async fn get_or_stopped(&self, key: &ProcessKey) -> Result<StatusRecord> {
        let record = self.get(key).await?;
        if record.status == StatusKind::NotFound {
            Ok(StatusRecord::stopped())
        } else {
            Ok(record)
        }
    }

    pub async fn set_fields(&self, key: &ProcessKey, update: StatusUpdate) -> Result<()> {
        let fields = update.into_fields();
        if fields.is_empty() {
            return Ok(());
        }
        let fields_ref: Vec<(&str, String)> = fields.into_iter().collect();
        self.bus.hset_multiple(&key.redis_key(), &fields_ref).await
    }

    pub async fn clear_pid(&self, key: &ProcessKey) -> Result<()> {
        self.bus
            .hdel(&key.redis_key(), &["pid", "last_active"])
            .await
    }

    pub async fn delete(&self, key: &ProcessKey) -> Result<()> {
        self.bus.delete(&key.redis_key()).await?;
        if let Some(legacy) = key.legacy_redis_key() {
            self.bus.delete(&legacy).await?;
        }
        Ok(())
    }

    /// All agent status keys, used by the inactivity sweeper.
    pub async fn scan_agent_statuses(&self) -> Result<Vec<ProcessKey>> {
        let keys = self.bus.keys("agent_process:*:status").await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| {
                k.strip_prefix("agent_process:")
                    .and_then(|k| k.strip_suffix(":status"))
                    .map(|agent_id| ProcessKey::agent(agent_id))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_kind_round_trips_through_its_string_form() {
        for kind in [
            StatusKind::NotFound,
            StatusKind::Stopped,
            StatusKind::Starting,
            StatusKind::Initializing,
            StatusKind::Running,
            StatusKind::Stopping,
            StatusKind::Error,
            StatusKind::ErrorProcessLost,
            StatusKind::ErrorStartFailed,
            StatusKind::ErrorStopFailed,
            StatusKind::Restarting,
        ] {
            assert_eq!(StatusKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn only_active_states_are_considered_live() {
        assert!(StatusKind::Running.is_live());
        assert!(StatusKind::Stopping.is_live());
        assert!(!StatusKind::Stopped.is_live());
        assert!(!StatusKind::ErrorProcessLost.is_live());
    }

    #[test]
    fn empty_string_fields_are_treated_as_absent() {
        let mut map = HashMap::new();
        map.insert("status".to_string(), "running".to_string());
        map.insert("pid".to_string(), "".to_string());
        map.insert("error_detail".to_string(), "".to_string());
        let record = StatusRecord::from_hash(&map).unwrap();
        assert_eq!(record.pid, None);
        assert_eq!(record.error_detail, None);
    }

    #[test]
    fn empty_hash_has_no_record() {
        assert!(StatusRecord::from_hash(&HashMap::new()).is_none());
    }

    #[test]
    fn process_key_label_distinguishes_agents_and_integrations() {
        let agent = ProcessKey::agent("a1");
        let integration = ProcessKey::integration("telegram", "a1");
        assert_eq!(agent.label(), "agent:a1");
        assert_eq!(integration.label(), "integration:telegram:a1");
    }
}
