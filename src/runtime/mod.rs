//! C9 — Child Runtime.
//!
//! The code every agent worker process runs: bootstrap, the input and
//! control listener tasks, and the restart/shutdown flags that drive
//! re-entry into bootstrap without exiting the process.

pub mod engine;

use crate::bus::{
    Bus, ChatEvent, ControlCommand, ErrorEnvelope, InputEnvelope, OutputEnvelope, SenderType,
    agent_status_key, control_channel, input_channel, output_channel,
};
use crate::error::{Error, Result};
use crate::runtime::engine::ReasoningEngine;
use futures::StreamExt as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const LAST_ACTIVE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const CONFIG_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-agent settings fetched from the Control Plane's internal config
/// endpoint at each bootstrap. Opaque beyond what the runtime itself needs;
/// the reasoning engine receives the raw JSON it was built from.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentRuntimeConfig {
    pub agent_id: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Shared flags the control listener sets and the bootstrap loop observes
/// between runs.
struct RuntimeFlags {
    shutdown: AtomicBool,
    needs_restart: AtomicBool,
    notify: Notify,
}

impl RuntimeFlags {
    fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            needs_restart: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }
}

pub struct ChildRuntime {
    agent_id: String,
    bus: Bus,
    control_plane_base_url: String,
    engine_factory: Box<dyn Fn(&AgentRuntimeConfig) -> Arc<dyn ReasoningEngine> + Send + Sync>,
}

impl ChildRuntime {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Bus,
        control_plane_base_url: impl Into<String>,
        engine_factory: impl Fn(&AgentRuntimeConfig) -> Arc<dyn ReasoningEngine> + Send + Sync + 'static,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            bus,
            control_plane_base_url: control_plane_base_url.into(),
            engine_factory: Box::new(engine_factory),
        }
    }

    /// Run bootstrap, then the listener pair, re-entering bootstrap after a
    /// `restart` control command until a `shutdown` is observed.
    pub async fn run(&self) -> Result<()> {
        loop {
            let outcome = self.bootstrap_and_serve().await;
            if let Err(error) = &outcome {
                tracing::error!(agent_id = %self.agent_id, %error, "child runtime bootstrap failed");
                self.write_status("error", Some(error.to_string())).await;
                return outcome;
            }

            if outcome? {
                // needs_restart: loop back into bootstrap.
                continue;
            }
            return Ok(());
        }
    }

    /// Runs one bootstrap + serve cycle. Returns `Ok(true)` if the cycle
    /// ended because of a restart request (caller should bootstrap again),
    /// `Ok(false)` on a clean shutdown.
    async fn bootstrap_and_serve(&self) -> Result<bool> {
        self.write_status("initializing", None).await;

        let config = self.fetch_config().await?;
        let engine = (self.engine_factory)(&config);

        self.write_status_running().await?;

        let flags = Arc::new(RuntimeFlags::new());

        let input_task = tokio::spawn(Self::run_input_listener(
            self.agent_id.clone(),
            self.bus.clone(),
            Arc::clone(&engine),
            Arc::clone(&flags),
        ));
        let control_task = tokio::spawn(Self::run_control_listener(
            self.agent_id.clone(),
            self.bus.clone(),
            Arc::clone(&flags),
        ));

        flags.notify.notified().await;
        input_task.abort();
        control_task.abort();

        let restart = flags.needs_restart.load(Ordering::Acquire);
        if restart {
            self.write_status("restarting", None).await;
        } else {
            self.write_status("stopped", None).await;
        }
        Ok(restart)
    }

    async fn fetch_config(&self) -> Result<AgentRuntimeConfig> {
        let url = format!(
            "{}/agents/{}/config",
            self.control_plane_base_url.trim_end_matches('/'),
            self.agent_id
        );
        let client = reqwest::Client::builder()
            .timeout(CONFIG_FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Other(e.into()))?;
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::config_missing(format!("{}: {e}", self.agent_id)))?;
        if !response.status().is_success() {
            return Err(Error::config_missing(self.agent_id.clone()));
        }
        response
            .json::<AgentRuntimeConfig>()
            .await
            .map_err(|e| Error::Other(e.into()))
    }

    async fn write_status(&self, status: &str, error_detail: Option<String>) {
        use crate::status::{ProcessKey, StatusStore, StatusUpdate};
        let kind = crate::status::StatusKind::from_str(status).unwrap_or(crate::status::StatusKind::Error);
        let mut update = StatusUpdate::status(kind);
        if let Some(detail) = error_detail {
            update = update.with_error_detail(detail);
        }
        let store = StatusStore::new(self.bus.clone());
        let key = ProcessKey::agent(&self.agent_id);
        if let Err(error) = store.set_fields(&key, update).await {
            tracing::warn!(agent_id = %self.agent_id, %error, "failed to write status");
        }
    }

    async fn write_status_running(&self) -> Result<()> {
        use crate::status::{ProcessKey, StatusStore, StatusUpdate};
        let store = StatusStore::new(self.bus.clone());
        let key = ProcessKey::agent(&self.agent_id);
        let update = StatusUpdate::status(crate::status::StatusKind::Running)
            .with_pid(std::process::id())
            .with_last_active_now();
        store.set_fields(&key, update).await
    }

    async fn run_input_listener(
        agent_id: String,
        bus: Bus,
        engine: Arc<dyn ReasoningEngine>,
        flags: Arc<RuntimeFlags>,
    ) {
        let channel = input_channel(&agent_id);
        let mut pubsub = match bus.pubsub().await {
            Ok(p) => p,
            Err(error) => {
                tracing::error!(%agent_id, %error, "input listener failed to open pubsub");
                return;
            }
        };
        if let Err(error) = pubsub.subscribe(&channel).await {
            tracing::error!(%agent_id, %error, "input listener failed to subscribe");
            return;
        }

        let mut stream = pubsub.into_on_message();
        let mut last_refresh = tokio::time::Instant::now();

        loop {
            let timeout = tokio::time::sleep(LAST_ACTIVE_REFRESH_INTERVAL);
            tokio::select! {
                maybe_msg = stream.next() => {
                    let Some(msg) = maybe_msg else { break };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    Self::handle_one_input(&agent_id, &bus, &engine, &payload).await;
                    last_refresh = tokio::time::Instant::now();
                }
                _ = timeout => {
                    if last_refresh.elapsed() >= LAST_ACTIVE_REFRESH_INTERVAL {
                        Self::refresh_last_active(&agent_id, &bus).await;
                        last_refresh = tokio::time::Instant::now();
                    }
                }
            }
        }
        let _ = flags;
    }

    async fn handle_one_input(
        agent_id: &str,
        bus: &Bus,
        engine: &Arc<dyn ReasoningEngine>,
        payload: &str,
    ) {
        let envelope: InputEnvelope = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(error) => {
                tracing::warn!(%agent_id, %error, "malformed input envelope");
                let err_env = ErrorEnvelope {
                    thread_id: String::new(),
                    error: format!("malformed envelope: {error}"),
                };
                let _ = bus.publish_json(&output_channel(agent_id), &err_env).await;
                return;
            }
        };

        Self::enqueue_history(bus, agent_id, &envelope, SenderType::User).await;

        match engine.handle_turn(&envelope).await {
            Ok(outcome) => {
                let out = OutputEnvelope {
                    thread_id: envelope.thread_id.clone(),
                    chat_id: envelope.chat_id.clone(),
                    channel: envelope.channel.clone(),
                    response: outcome.response.clone(),
                    message_object: outcome.message_object,
                    audio_url: outcome.audio_url,
                };
                if let Err(error) = bus.publish_json(&output_channel(agent_id), &out).await {
                    tracing::warn!(%agent_id, %error, "failed to publish output envelope");
                }
                Self::enqueue_history_reply(bus, agent_id, &envelope, &outcome.response).await;
                Self::touch_last_active(bus, agent_id).await;
            }
            Err(error) => {
                tracing::warn!(%agent_id, %error, "reasoning engine turn failed");
                let err_env = ErrorEnvelope {
                    thread_id: envelope.thread_id.clone(),
                    error: error.to_string(),
                };
                let _ = bus.publish_json(&output_channel(agent_id), &err_env).await;
            }
        }
    }

    async fn enqueue_history(
        bus: &Bus,
        agent_id: &str,
        envelope: &InputEnvelope,
        sender: SenderType,
    ) {
        let event = ChatEvent {
            agent_id: agent_id.to_string(),
            thread_id: envelope.thread_id.clone(),
            sender_type: sender,
            content: envelope.text.clone(),
            channel: Some(envelope.channel.clone()),
            timestamp: chrono::Utc::now(),
        };
        if let Err(error) = bus.lpush_json("chat_history_queue", &event).await {
            tracing::warn!(%agent_id, %error, "failed to enqueue inbound history record");
        }
    }

    async fn enqueue_history_reply(
        bus: &Bus,
        agent_id: &str,
        envelope: &InputEnvelope,
        response: &str,
    ) {
        let event = ChatEvent {
            agent_id: agent_id.to_string(),
            thread_id: envelope.thread_id.clone(),
            sender_type: SenderType::Agent,
            content: response.to_string(),
            channel: Some(envelope.channel.clone()),
            timestamp: chrono::Utc::now(),
        };
        if let Err(error) = bus.lpush_json("chat_history_queue", &event).await {
            tracing::warn!(%agent_id, %error, "failed to enqueue outbound history record");
        }
    }

    async fn touch_last_active(bus: &Bus, agent_id: &str) {
        use crate::status::{ProcessKey, StatusStore, StatusUpdate};
        let store = StatusStore::new(bus.clone());
        let key = ProcessKey::agent(agent_id);
        let update = StatusUpdate {
            last_active: Some(chrono::Utc::now().timestamp()),
            ..Default::default()
        };
        let _ = store.set_fields(&key, update).await;
    }

    async fn refresh_last_active(agent_id: &str, bus: &Bus) {
        Self::touch_last_active(bus, agent_id).await;
        let _ = agent_status_key(agent_id);
    }

    async fn run_control_listener(agent_id: String, bus: Bus, flags: Arc<RuntimeFlags>) {
        let channel = control_channel(&agent_id);
        let mut pubsub = match bus.pubsub().await {
            Ok(p) => p,
            Err(error) => {
                tracing::error!(%agent_id, %error, "control listener failed to open pubsub");
                return;
            }
        };
        if let Err(error) = pubsub.subscribe(&channel).await {
            tracing::error!(%agent_id, %error, "control listener failed to subscribe");
            return;
        }
        let mut stream = pubsub.into_on_message();

        let mut sigterm = Self::signal_stream();

        loop {
            tokio::select! {
                maybe_msg = stream.next() => {
                    let Some(msg) = maybe_msg else { break };
                    let Ok(payload) = msg.get_payload::<String>() else { continue };
                    Self::handle_control_payload(&agent_id, &payload, &flags);
                }
                _ = sigterm.recv() => {
                    tracing::info!(%agent_id, "signal received, shutting down");
                    flags.shutdown.store(true, Ordering::Release);
                    flags.notify.notify_waiters();
                    break;
                }
            }
        }
    }

    fn handle_control_payload(agent_id: &str, payload: &str, flags: &Arc<RuntimeFlags>) {
        let envelope: crate::bus::ControlEnvelope = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(error) => {
                tracing::warn!(%agent_id, %error, "malformed control envelope");
                return;
            }
        };
        match envelope.command {
            ControlCommand::Shutdown => {
                flags.shutdown.store(true, Ordering::Release);
                flags.notify.notify_waiters();
            }
            ControlCommand::Restart => {
                flags.needs_restart.store(true, Ordering::Release);
                flags.notify.notify_waiters();
            }
        }
    }

    /// First SIGTERM/SIGINT triggers the graceful-shutdown path below; a
    /// second one means graceful shutdown is stuck, so it kills the process
    /// outright instead of waiting on it forever.
    #[cfg(unix)]
    fn signal_stream() -> tokio::sync::mpsc::Receiver<()> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            let _ = tx.send(()).await;
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            tracing::warn!("second termination signal received, exiting immediately");
            std::process::exit(130);
        });
        rx
    }

    #[cfg(not(unix))]
    fn signal_stream() -> tokio::sync::mpsc::Receiver<()> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_runtime_config_defaults_settings_to_null() {
        let json = r#"{"agent_id":"a1"}"#;
        let config: AgentRuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.agent_id, "a1");
        assert!(config.settings.is_null());
    }
}
