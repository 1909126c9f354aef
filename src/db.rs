use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::config::AppConfig;
use crate::models::{SessionRecord, StoredMessage};

/// Session document store: one JSON history document per session id.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::connect(&config.sqlite_dsn()).await
    }

    pub async fn connect(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .with_context(|| format!("invalid sqlite dsn: {dsn}"))?
            .create_if_missing(true);

        // Every connection to `:memory:` opens its own database, so pin the pool to one.
        let pool = if dsn.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(10)
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                id TEXT PRIMARY KEY,
                history TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query("SELECT id, history FROM chat_history WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read chat history")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.get("history");
        let history: Vec<StoredMessage> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed chat history record for session {session_id}"))?;

        Ok(Some(SessionRecord {
            id: row.get("id"),
            history,
        }))
    }

    pub async fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        let history = serde_json::to_string(&record.history)?;

        sqlx::query(
            r#"
            INSERT INTO chat_history (id, history, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                history = excluded.history,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(history)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to write chat history")?;

        Ok(())
    }

    /// Returns whether a record existed and was removed.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_history WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("failed to delete chat history")?;

        Ok(result.rows_affected() == 1)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
