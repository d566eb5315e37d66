//! Agent configuration repository.
//!
//! The relational half of the data model: the `agent_configs` table the
//! Control Plane reads and writes. Grounded on `conversation/history.rs`'s
//! raw-query sqlx style (`CREATE TABLE IF NOT EXISTS`, positional binds,
//! `Row::try_get`) and on the schema in
//! `original_source/agent_manager/models.py::AgentConfigDB`.

use crate::error::{Error, Result};
use sqlx::Row as _;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// One row of the `agent_configs` table. `config_json` is the opaque
/// configuration document (model, prompt, tools, integration settings);
/// the repository never inspects it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub user_id: String,
    pub config_json: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields accepted from a create or update request.
#[derive(Debug, Clone)]
pub struct AgentConfigInput {
    pub name: String,
    pub description: Option<String>,
    pub user_id: String,
    pub config_json: serde_json::Value,
}

#[derive(Clone)]
pub struct AgentConfigRepo {
    pool: SqlitePool,
}

impl AgentConfigRepo {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_configs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                user_id TEXT NOT NULL,
                config_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create(&self, id: &str, input: &AgentConfigInput) -> Result<AgentConfig> {
        let now = chrono::Utc::now();
        let config_json = serde_json::to_string(&input.config_json).map_err(|e| Error::Other(e.into()))?;
        sqlx::query(
            "INSERT INTO agent_configs (id, name, description, user_id, config_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.user_id)
        .bind(&config_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(AgentConfig {
            id: id.to_string(),
            name: input.name.clone(),
            description: input.description.clone(),
            user_id: input.user_id.clone(),
            config_json: input.config_json.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<AgentConfig>> {
        let row = sqlx::query("SELECT * FROM agent_configs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::row_to_config(&row)).transpose()
    }

    pub async fn list(&self) -> Result<Vec<AgentConfig>> {
        let rows = sqlx::query("SELECT * FROM agent_configs ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_config).collect()
    }

    /// Returns `Ok(None)` if no row with `id` exists, matching the API
    /// layer's "update a nonexistent agent is a 404" rule.
    pub async fn update(&self, id: &str, input: &AgentConfigInput) -> Result<Option<AgentConfig>> {
        if self.get(id).await?.is_none() {
            return Ok(None);
        }
        let now = chrono::Utc::now();
        let config_json = serde_json::to_string(&input.config_json).map_err(|e| Error::Other(e.into()))?;
        sqlx::query(
            "UPDATE agent_configs SET name = ?, description = ?, user_id = ?, config_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.user_id)
        .bind(&config_json)
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get(id).await
    }

    /// Returns whether a row was actually deleted.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agent_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<AgentConfig> {
        let config_raw: String = row.try_get("config_json")?;
        let config_json = serde_json::from_str(&config_raw).unwrap_or(serde_json::Value::Null);
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(AgentConfig {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            user_id: row.try_get("user_id")?,
            config_json,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> AgentConfigInput {
        AgentConfigInput {
            name: "Assistant".to_string(),
            description: Some("demo".to_string()),
            user_id: "u1".to_string(),
            config_json: serde_json::json!({"model": "demo", "temperature": 0.7}),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips_the_record() {
        let repo = AgentConfigRepo::connect_in_memory().await.unwrap();
        let created = repo.create("a1", &sample_input()).await.unwrap();
        assert_eq!(created.id, "a1");

        let fetched = repo.get("a1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Assistant");
        assert_eq!(fetched.config_json["model"], "demo");
    }

    #[tokio::test]
    async fn update_on_missing_agent_returns_none() {
        let repo = AgentConfigRepo::connect_in_memory().await.unwrap();
        let result = repo.update("missing", &sample_input()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let repo = AgentConfigRepo::connect_in_memory().await.unwrap();
        repo.create("a1", &sample_input()).await.unwrap();
        assert!(repo.delete("a1").await.unwrap());
        assert!(!repo.delete("a1").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_every_created_agent() {
        let repo = AgentConfigRepo::connect_in_memory().await.unwrap();
        repo.create("a1", &sample_input()).await.unwrap();
        repo.create("a2", &sample_input()).await.unwrap();
        let agents = repo.list().await.unwrap();
        assert_eq!(agents.len(), 2);
    }
}
