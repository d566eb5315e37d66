//! C7 — Control Plane.
//!
//! The HTTP surface: agent/integration CRUD and lifecycle commands, status
//! reads, the internal per-agent config endpoint a freshly spawned child
//! calls, the duplex WebSocket relay, and the health check. Router
//! assembly follows the nested-`/api`-router-plus-CORS shape of the
//! teacher's `api/server.rs`.

pub mod agents;
pub mod health;
pub mod integrations;
pub mod server;
pub mod state;
pub mod ws;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Maps the crate-wide error taxonomy onto the status codes the design
/// prescribes per kind, with a JSON body carrying the human detail.
impl IntoResponse for crate::error::Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
