//! Telegram channel adapter.
//!
//! One concrete, protocol-light implementation of [`ChannelAdapter`], built
//! on `teloxide`'s raw long-polling API (no dispatcher/macros) the way the
//! teacher's own `messaging/telegram.rs` is a minimal stub rather than a
//! full-featured bot — enough to demonstrate the contract end-to-end
//! without pulling in the full messaging-provider matrix.

use crate::bus::{
    Bus, ChatEvent, ControlCommand, InputEnvelope, OutputEnvelope, SenderType, control_channel,
    input_channel, output_channel,
};
use crate::error::{Error, Result};
use crate::messaging::ChannelAdapter;
use futures::StreamExt as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use teloxide::prelude::*;
use teloxide::types::UpdateKind;

const POLL_TIMEOUT_SECS: u32 = 30;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TelegramSettings {
    pub bot_token: String,
}

pub struct TelegramAdapter {
    bot: Bot,
    bus: Bus,
}

impl TelegramAdapter {
    pub fn new(settings: &TelegramSettings, bus: Bus) -> Self {
        Self {
            bot: Bot::new(&settings.bot_token),
            bus,
        }
    }

    async fn enqueue_history(bus: &Bus, agent_id: &str, thread_id: &str, sender: SenderType, content: &str) {
        let event = ChatEvent {
            agent_id: agent_id.to_string(),
            thread_id: thread_id.to_string(),
            sender_type: sender,
            content: content.to_string(),
            channel: Some("telegram".to_string()),
            timestamp: chrono::Utc::now(),
        };
        if let Err(error) = bus.lpush_json("chat_history_queue", &event).await {
            tracing::warn!(agent_id, %error, "telegram adapter failed to enqueue history record");
        }
    }

    async fn forward_inbound(bus: &Bus, agent_id: &str, message: Message) {
        let Some(text) = message.text() else { return };
        let chat_id = message.chat.id.0.to_string();
        let platform_user_id = message
            .from
            .as_ref()
            .map(|u| u.id.0.to_string())
            .unwrap_or_default();

        let envelope = InputEnvelope {
            text: text.to_string(),
            chat_id: chat_id.clone(),
            platform_user_id,
            thread_id: chat_id.clone(),
            user_data: serde_json::Value::Null,
            channel: "telegram".to_string(),
            image_urls: Vec::new(),
            voice_data: None,
            document_content: None,
        };

        if let Err(error) = bus.publish_json(&input_channel(agent_id), &envelope).await {
            tracing::warn!(agent_id, %error, "telegram adapter failed to publish input envelope");
            return;
        }
        Self::enqueue_history(bus, agent_id, &chat_id, SenderType::User, text).await;
    }

    /// Subscribes to the agent's output channel and relays matching
    /// replies back to their originating Telegram chat.
    async fn run_output_forwarder(bot: Bot, bus: Bus, agent_id: String, stop: Arc<AtomicBool>) {
        let mut pubsub = match bus.pubsub().await {
            Ok(p) => p,
            Err(error) => {
                tracing::error!(%agent_id, %error, "telegram adapter failed to open output pubsub");
                return;
            }
        };
        if let Err(error) = pubsub.subscribe(output_channel(&agent_id)).await {
            tracing::error!(%agent_id, %error, "telegram adapter failed to subscribe to output channel");
            return;
        }
        let mut stream = pubsub.into_on_message();

        while !stop.load(Ordering::Acquire) {
            let Some(msg) = stream.next().await else { break };
            let Ok(payload) = msg.get_payload::<String>() else { continue };
            let Ok(envelope) = serde_json::from_str::<OutputEnvelope>(&payload) else { continue };
            if envelope.channel != "telegram" {
                continue;
            }
            let Ok(chat_id_raw) = envelope.chat_id.parse::<i64>() else { continue };
            let chat_id = ChatId(chat_id_raw);

            if let Err(error) = bot.send_message(chat_id, &envelope.response).send().await {
                tracing::warn!(%agent_id, %error, "telegram adapter failed to deliver reply");
                continue;
            }
            Self::enqueue_history(&bus, &agent_id, &envelope.thread_id, SenderType::Agent, &envelope.response)
                .await;
        }
    }

    async fn run_inbound_poll(bot: Bot, bus: Bus, agent_id: String, stop: Arc<AtomicBool>) {
        let mut offset = 0i32;
        while !stop.load(Ordering::Acquire) {
            let updates = bot
                .get_updates()
                .offset(offset)
                .timeout(POLL_TIMEOUT_SECS)
                .send()
                .await;

            let updates = match updates {
                Ok(updates) => updates,
                Err(error) => {
                    tracing::warn!(%agent_id, %error, "telegram getUpdates failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.id.0 as i32 + 1);
                if let UpdateKind::Message(message) = update.kind {
                    Self::forward_inbound(&bus, &agent_id, message).await;
                }
            }
        }
    }

    /// Subscribes to the agent's control channel; returns `true` on
    /// `restart`, `false` on `shutdown` or a dropped subscription.
    async fn wait_for_control(&self, agent_id: &str) -> bool {
        let mut pubsub = match self.bus.pubsub().await {
            Ok(p) => p,
            Err(error) => {
                tracing::error!(agent_id, %error, "telegram adapter failed to open control pubsub");
                return false;
            }
        };
        if pubsub.subscribe(control_channel(agent_id)).await.is_err() {
            return false;
        }
        let mut stream = pubsub.into_on_message();
        while let Some(msg) = stream.next().await {
            let Ok(payload) = msg.get_payload::<String>() else { continue };
            let Ok(envelope) = serde_json::from_str::<crate::bus::ControlEnvelope>(&payload) else {
                continue;
            };
            match envelope.command {
                ControlCommand::Restart => return true,
                ControlCommand::Shutdown => return false,
            }
        }
        false
    }
}

impl ChannelAdapter for TelegramAdapter {
    fn integration_type(&self) -> &'static str {
        "telegram"
    }

    async fn run(&self, agent_id: &str) -> Result<bool> {
        let stop = Arc::new(AtomicBool::new(false));

        let inbound = tokio::spawn(Self::run_inbound_poll(
            self.bot.clone(),
            self.bus.clone(),
            agent_id.to_string(),
            Arc::clone(&stop),
        ));
        let outbound = tokio::spawn(Self::run_output_forwarder(
            self.bot.clone(),
            self.bus.clone(),
            agent_id.to_string(),
            Arc::clone(&stop),
        ));

        let restart = self.wait_for_control(agent_id).await;
        stop.store(true, Ordering::Release);
        inbound.abort();
        outbound.abort();

        Ok(restart)
    }
}

impl TryFrom<&str> for TelegramSettings {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::config_missing(format!("telegram settings: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_parse_from_json() {
        let settings = TelegramSettings::try_from(r#"{"bot_token":"abc123"}"#).unwrap();
        assert_eq!(settings.bot_token, "abc123");
    }

    #[test]
    fn settings_reject_missing_token() {
        assert!(TelegramSettings::try_from("{}").is_err());
    }
}
