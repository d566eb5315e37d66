//! C10 — History Persister.
//!
//! A supervisor + worker pair running as in-process cooperative tasks of
//! `fleetctl serve`, never a separate OS process — mirroring the asyncio
//! task structure of `original_source/agent_manager/history_saver.py`
//! exactly. The worker blocks on `BRPOP chat_history_queue`, validates and
//! normalises each record, and inserts it into the `chat_messages` table;
//! the supervisor restarts a worker that dies, with a short delay before
//! reconnecting Redis.

use crate::bus::{Bus, SenderType};
use crate::error::Result;
use sqlx::Row as _;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Schema setup for `chat_messages`, run once at supervisor startup.
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            sender_type TEXT NOT NULL,
            content TEXT NOT NULL,
            channel TEXT,
            timestamp TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_chat_messages_agent_id ON chat_messages (agent_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_chat_messages_thread_id ON chat_messages (thread_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_chat_messages_timestamp ON chat_messages (timestamp)")
        .execute(pool)
        .await?;
    Ok(())
}

/// One persisted row, returned by [`load_recent`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessageRow {
    pub id: i64,
    pub agent_id: String,
    pub thread_id: String,
    pub sender_type: SenderType,
    pub content: String,
    pub channel: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub async fn load_recent(pool: &SqlitePool, agent_id: &str, thread_id: &str, limit: i64) -> Result<Vec<ChatMessageRow>> {
    let rows = sqlx::query(
        "SELECT id, agent_id, thread_id, sender_type, content, channel, timestamp
         FROM chat_messages WHERE agent_id = ? AND thread_id = ?
         ORDER BY timestamp ASC LIMIT ?",
    )
    .bind(agent_id)
    .bind(thread_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let sender_raw: String = row.try_get("sender_type").ok()?;
            let sender_type = parse_sender_type(&sender_raw)?;
            let timestamp_raw: String = row.try_get("timestamp").ok()?;
            Some(ChatMessageRow {
                id: row.try_get("id").ok()?,
                agent_id: row.try_get("agent_id").ok()?,
                thread_id: row.try_get("thread_id").ok()?,
                sender_type,
                content: row.try_get("content").ok()?,
                channel: row.try_get("channel").ok()?,
                timestamp: parse_timestamp(&timestamp_raw)?,
            })
        })
        .collect())
}

fn parse_sender_type(raw: &str) -> Option<SenderType> {
    match raw {
        "user" => Some(SenderType::User),
        "agent" => Some(SenderType::Agent),
        "system" => Some(SenderType::System),
        _ => None,
    }
}

fn sender_type_str(sender: SenderType) -> &'static str {
    match sender {
        SenderType::User => "user",
        SenderType::Agent => "agent",
        SenderType::System => "system",
    }
}

fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .ok()
}

/// One record as it arrives off `chat_history_queue`, before validation.
/// Stringly typed on purpose: a record with a missing or malformed field
/// must be dropped with a log line naming the field, not silently coerced.
#[derive(Debug, Clone, serde::Deserialize)]
struct RawChatEvent {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    sender_type: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

struct ValidChatEvent {
    agent_id: String,
    thread_id: String,
    sender_type: SenderType,
    content: String,
    channel: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Validate a raw queue payload. Every field must be present and, where
/// truthy is required (agent_id, thread_id, sender_type, content,
/// timestamp), non-empty — matching `history_saver.py`'s all-or-nothing
/// rule. A timestamp with no timezone offset is assumed UTC.
fn validate(raw: &str) -> std::result::Result<ValidChatEvent, String> {
    let event: RawChatEvent =
        serde_json::from_str(raw).map_err(|e| format!("malformed JSON: {e}"))?;

    let agent_id = event.agent_id.filter(|s| !s.is_empty()).ok_or("missing agent_id")?;
    let thread_id = event.thread_id.filter(|s| !s.is_empty()).ok_or("missing thread_id")?;
    let content = event.content.filter(|s| !s.is_empty()).ok_or("missing content")?;
    let sender_raw = event.sender_type.filter(|s| !s.is_empty()).ok_or("missing sender_type")?;
    let sender_type = parse_sender_type(&sender_raw)
        .ok_or_else(|| format!("invalid sender_type: {sender_raw}"))?;
    let timestamp_raw = event.timestamp.filter(|s| !s.is_empty()).ok_or("missing timestamp")?;
    let timestamp = parse_event_timestamp(&timestamp_raw)
        .ok_or_else(|| format!("invalid timestamp: {timestamp_raw}"))?;

    Ok(ValidChatEvent {
        agent_id,
        thread_id,
        sender_type,
        content,
        channel: event.channel.filter(|s| !s.is_empty()),
        timestamp,
    })
}

/// Parses an ISO-8601 timestamp, defaulting to UTC when no offset is
/// present rather than rejecting it.
fn parse_event_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

async fn insert(pool: &SqlitePool, event: &ValidChatEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO chat_messages (agent_id, thread_id, sender_type, content, channel, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.agent_id)
    .bind(&event.thread_id)
    .bind(sender_type_str(event.sender_type))
    .bind(&event.content)
    .bind(&event.channel)
    .bind(event.timestamp.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Runs the worker loop once: pop, validate, insert, repeat. Returns on a
/// bus error (the supervisor treats that as worth reconnecting over) or
/// when `stop` is raised.
async fn run_worker(bus: &Bus, pool: &SqlitePool, queue_name: &str, stop: &AtomicBool) -> Result<()> {
    let mut conn = bus.dedicated_connection().await?;
    while !stop.load(Ordering::Acquire) {
        let (_, payload) = Bus::brpop(&mut conn, queue_name).await?;
        match validate(&payload) {
            Ok(event) => {
                if let Err(error) = insert(pool, &event).await {
                    tracing::warn!(
                        agent_id = %event.agent_id,
                        thread_id = %event.thread_id,
                        %error,
                        "history_persist_dropped_total: database error, dropping record"
                    );
                }
            }
            Err(detail) => {
                tracing::warn!(%detail, "history_persist_dropped_total: malformed chat event, dropping");
            }
        }
    }
    Ok(())
}

/// Restarts [`run_worker`] with a delay whenever it returns an error,
/// reconnecting the bus each time. Runs until `stop` is set.
pub async fn run_supervisor(redis_url: String, pool: SqlitePool, queue_name: String, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let bus = match Bus::connect(&redis_url).await {
            Ok(bus) => bus,
            Err(error) => {
                tracing::error!(%error, "history supervisor failed to connect to the bus");
                tokio::time::sleep(RESTART_DELAY).await;
                continue;
            }
        };

        if let Err(error) = run_worker(&bus, &pool, &queue_name, &stop).await {
            if stop.load(Ordering::Acquire) {
                break;
            }
            tracing::error!(%error, "history worker stopped, restarting after delay");
            tokio::time::sleep(RESTART_DELAY).await;
        }
    }
    tracing::info!("history supervisor shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_malformed_json() {
        let result = validate("{not json");
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_missing_required_field() {
        let raw = r#"{"agent_id":"a1","thread_id":"t1","sender_type":"user","content":"hi"}"#;
        assert!(validate(raw).is_err());
    }

    #[test]
    fn validate_rejects_empty_string_fields() {
        let raw = r#"{"agent_id":"","thread_id":"t1","sender_type":"user","content":"hi","timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(validate(raw).is_err());
    }

    #[test]
    fn validate_rejects_unknown_sender_type() {
        let raw = r#"{"agent_id":"a1","thread_id":"t1","sender_type":"robot","content":"hi","timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(validate(raw).is_err());
    }

    #[test]
    fn validate_accepts_a_well_formed_event() {
        let raw = r#"{"agent_id":"a1","thread_id":"t1","sender_type":"agent","content":"hi","channel":"telegram","timestamp":"2024-01-01T00:00:00Z"}"#;
        let event = validate(raw).unwrap();
        assert_eq!(event.agent_id, "a1");
        assert_eq!(event.channel.as_deref(), Some("telegram"));
    }

    #[test]
    fn validate_defaults_naive_timestamps_to_utc() {
        let raw = r#"{"agent_id":"a1","thread_id":"t1","sender_type":"user","content":"hi","timestamp":"2024-01-01T00:00:00"}"#;
        let event = validate(raw).unwrap();
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn insert_then_load_recent_round_trips() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let event = validate(
            r#"{"agent_id":"a1","thread_id":"t1","sender_type":"user","content":"hi","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        insert(&pool, &event).await.unwrap();

        let rows = load_recent(&pool, "a1", "t1", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hi");
        assert_eq!(rows[0].sender_type, SenderType::User);
    }
}
