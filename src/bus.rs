//! Redis-backed message bus: connection management, channel/key naming, and
//! the JSON envelope shapes carried on it.
//!
//! None of this workspace's starting point depends on the `redis` crate; this module's shape
//! is grounded on the typed-envelope-plus-pub/sub-trait pattern shown in
//! `other_examples/9c6dc7d7_iannil-code-coder__...bus.rs.rs` and the
//! dependency declaration style from `other_examples/manifests/xkayo32-pytake`.

use crate::error::{Error, Result};
use redis::AsyncCommands as _;
use redis::aio::{ConnectionManager, PubSub};
use serde::{Deserialize, Serialize};

/// A connected handle to the bus. Cheap to clone: `ConnectionManager`
/// multiplexes all commands issued against it over a single connection and
/// transparently reconnects with backoff.
#[derive(Clone)]
pub struct Bus {
    client: redis::Client,
    manager: ConnectionManager,
}

impl Bus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::BusUnavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(Self { client, manager })
    }

    /// A fresh, dedicated connection for operations that hold the
    /// connection across a long await (subscriptions, blocking pops) and
    /// therefore cannot share the multiplexed manager connection.
    pub async fn dedicated_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))
    }

    pub async fn pubsub(&self) -> Result<PubSub> {
        self.client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| Error::MalformedEnvelope {
                channel: channel.to_string(),
                detail: e.to_string(),
            })?;
        self.publish(channel, &payload).await
    }

    pub async fn hgetall(&self, key: &str) -> Result<std::collections::HashMap<String, String>> {
        let mut conn = self.manager.clone();
        let map = conn
            .hgetall(key)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(map)
    }

    pub async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(key, fields)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.keys(pattern)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))
    }

    pub async fn lpush_json<T: Serialize>(&self, list: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value).map_err(|e| Error::MalformedEnvelope {
            channel: list.to_string(),
            detail: e.to_string(),
        })?;
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(list, payload)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Blocking right-pop with no timeout, per the FIFO history queue
    /// contract. Takes a dedicated connection since it parks for as long as
    /// the queue is empty.
    pub async fn brpop(
        conn: &mut redis::aio::MultiplexedConnection,
        list: &str,
    ) -> Result<(String, String)> {
        let result: (String, String) = conn
            .brpop(list, 0.0)
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        Ok(result)
    }
}

// ---------------------------------------------------------------------
// Channel / key naming
// ---------------------------------------------------------------------

pub fn input_channel(agent_id: &str) -> String {
    format!("agent:{agent_id}:input")
}

pub fn output_channel(agent_id: &str) -> String {
    format!("agent:{agent_id}:output")
}

pub fn control_channel(agent_id: &str) -> String {
    format!("agent_control:{agent_id}")
}

pub fn agent_status_key(agent_id: &str) -> String {
    format!("agent_process:{agent_id}:status")
}

pub fn integration_status_key(integration_type: &str, agent_id: &str) -> String {
    format!("integration_process:{integration_type}:{agent_id}:status")
}

/// The transitional key form that coexists with [`agent_status_key`];
/// consulted as a read fallback only.
pub fn legacy_agent_status_key(agent_id: &str) -> String {
    format!("agent_status:{agent_id}")
}

// ---------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEnvelope {
    pub text: String,
    pub chat_id: String,
    pub platform_user_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub user_data: serde_json::Value,
    pub channel: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub voice_data: Option<String>,
    #[serde(default)]
    pub document_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEnvelope {
    pub thread_id: String,
    pub chat_id: String,
    pub channel: String,
    pub response: String,
    #[serde(default)]
    pub message_object: serde_json::Value,
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// Published instead of an [`OutputEnvelope`] when a turn cannot be
/// completed — either the input was malformed or the reasoning engine
/// raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub thread_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Shutdown,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub command: ControlCommand,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub agent_id: String,
    pub thread_id: String,
    pub sender_type: SenderType,
    pub content: String,
    #[serde(default)]
    pub channel: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_match_the_documented_templates() {
        assert_eq!(input_channel("a1"), "agent:a1:input");
        assert_eq!(output_channel("a1"), "agent:a1:output");
        assert_eq!(control_channel("a1"), "agent_control:a1");
        assert_eq!(agent_status_key("a1"), "agent_process:a1:status");
        assert_eq!(
            integration_status_key("telegram", "a1"),
            "integration_process:telegram:a1:status"
        );
        assert_eq!(legacy_agent_status_key("a1"), "agent_status:a1");
    }

    #[test]
    fn control_command_serializes_lowercase() {
        let env = ControlEnvelope {
            command: ControlCommand::Restart,
        };
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"command":"restart"}"#);
    }

    #[test]
    fn input_envelope_round_trips_with_optional_fields_absent() {
        let raw = r#"{
            "text": "hi",
            "chat_id": "c1",
            "platform_user_id": "u1",
            "thread_id": "t1",
            "channel": "telegram"
        }"#;
        let env: InputEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.text, "hi");
        assert!(env.image_urls.is_empty());
        assert!(env.voice_data.is_none());
    }
}
