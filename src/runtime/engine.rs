//! The reasoning engine seam.
//!
//! The actual reasoning/rewriting engine that turns an [`InputEnvelope`]
//! into a reply is explicitly out of scope; what belongs here is the
//! contract the Child Runtime drives it through, and a deterministic test
//! double. Modeled on small, focused traits at integration
//! seams — see `messaging/traits.rs::Messaging`.

use crate::bus::InputEnvelope;
use crate::error::Result;
use async_trait::async_trait;

/// The final, user-facing outcome of one reasoning turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub response: String,
    pub message_object: serde_json::Value,
    pub audio_url: Option<String>,
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn handle_turn(&self, input: &InputEnvelope) -> Result<TurnOutcome>;
}

/// Deterministic engine that echoes the input text back, used by the
/// Child Runtime's own tests and by any integration test that needs a
/// real listener loop without a real LLM behind it.
pub struct EchoEngine;

#[async_trait]
impl ReasoningEngine for EchoEngine {
    async fn handle_turn(&self, input: &InputEnvelope) -> Result<TurnOutcome> {
        Ok(TurnOutcome {
            response: format!("echo: {}", input.text),
            message_object: serde_json::json!({ "role": "assistant", "text": input.text }),
            audio_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_engine_prefixes_the_input_text() {
        let engine = EchoEngine;
        let input = InputEnvelope {
            text: "hello".to_string(),
            chat_id: "c1".to_string(),
            platform_user_id: "u1".to_string(),
            thread_id: "t1".to_string(),
            user_data: serde_json::Value::Null,
            channel: "telegram".to_string(),
            image_urls: Vec::new(),
            voice_data: None,
            document_content: None,
        };
        let outcome = engine.handle_turn(&input).await.unwrap();
        assert_eq!(outcome.response, "echo: hello");
    }
}
