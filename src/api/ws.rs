//! `WS /ws/agents/{id}` — duplex relay between a client socket and the
//! agent's input/output bus channels. Grounded on the minimal
//! `WebSocketUpgrade` shape found across the example pack (a WebSocket
//! endpoint is otherwise foreign to this teacher's own `api/` module,
//! which only serves SSE).

use super::state::ApiState;
use crate::bus::{InputEnvelope, input_channel, output_channel};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt as _, StreamExt as _};
use std::sync::Arc;

/// Bound on the relay buffer between the Redis subscription task and the
/// socket writer. A full buffer means the client can't keep up; rather
/// than block the subscription task (and starve every other output reader
/// on that connection), the socket is dropped.
const OUTPUT_BUFFER: usize = 64;

pub(super) async fn ws_agent(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, agent_id))
}

#[tracing::instrument(skip(socket, state), fields(agent_id = %agent_id))]
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, agent_id: String) {
    let mut pubsub = match state.bus.pubsub().await {
        Ok(p) => p,
        Err(error) => {
            tracing::warn!(%error, "ws relay failed to open pubsub");
            return;
        }
    };
    if let Err(error) = pubsub.subscribe(output_channel(&agent_id)).await {
        tracing::warn!(%error, "ws relay failed to subscribe to output channel");
        return;
    }

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(OUTPUT_BUFFER);

    let mut output_stream = pubsub.into_on_message();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = output_stream.next().await {
            let Ok(payload) = msg.get_payload::<String>() else { continue };
            if tx.try_send(payload).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if serde_json::from_str::<InputEnvelope>(&text).is_err() {
                            tracing::warn!(%agent_id, "dropping malformed websocket input frame");
                            continue;
                        }
                        if let Err(error) = state.bus.publish(&input_channel(&agent_id), &text).await {
                            tracing::warn!(%agent_id, %error, "failed to publish websocket input envelope");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    forward_task.abort();
}
