//! SQLite history store.
//!
//! One table, `turns`, keyed by an autoincrement sequence so that append
//! order is the load order. Each append runs in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexstream_core::error::HistoryError;
use lexstream_core::history::{HistoryStore, ensure_storable};
use lexstream_core::message::{ConversationId, Message, MessageToolCall, Role};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// Durable history in a SQLite database file.
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    /// Open the database at `path`, creating it and its schema if needed.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn open(path: &str) -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| HistoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite history initialized at {path}");
        Ok(store)
    }

    /// Wrap an existing pool and make sure the schema exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, HistoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                id              TEXT NOT NULL,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                tool_calls      TEXT NOT NULL DEFAULT '[]',
                tool_call_id    TEXT,
                name            TEXT,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::MigrationFailed(format!("conversation index: {e}")))?;

        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, HistoryError> {
        let role_str: String = row.get("role");
        let role = Role::parse(&role_str)
            .ok_or_else(|| HistoryError::Corrupted(format!("unknown role '{role_str}'")))?;

        let tool_calls_json: String = row.get("tool_calls");
        let tool_calls: Vec<MessageToolCall> = serde_json::from_str(&tool_calls_json)
            .map_err(|e| HistoryError::Corrupted(format!("tool_calls column: {e}")))?;

        let created_at: String = row.get("created_at");
        let timestamp = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| HistoryError::Corrupted(format!("created_at column: {e}")))?;

        Ok(Message {
            id: row.get("id"),
            role,
            content: row.get("content"),
            tool_calls,
            tool_call_id: row.get("tool_call_id"),
            name: row.get("name"),
            timestamp,
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, id: &ConversationId, turns: Vec<Message>) -> Result<(), HistoryError> {
        ensure_storable(&turns)?;
        if turns.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to begin transaction: {e}")))?;

        for turn in &turns {
            let tool_calls = serde_json::to_string(&turn.tool_calls)
                .map_err(|e| HistoryError::Storage(format!("Failed to encode tool calls: {e}")))?;

            sqlx::query(
                r#"
                INSERT INTO turns (conversation_id, id, role, content, tool_calls, tool_call_id, name, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(id.as_str())
            .bind(&turn.id)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(tool_calls)
            .bind(&turn.tool_call_id)
            .bind(&turn.name)
            .bind(turn.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to insert turn: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to commit turns: {e}")))?;
        Ok(())
    }

    async fn load(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, role, content, tool_calls, tool_call_id, name, created_at
            FROM turns
            WHERE conversation_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HistoryError::Storage(format!("Failed to load turns: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn contains(&self, id: &ConversationId) -> Result<bool, HistoryError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM turns WHERE conversation_id = ?1) AS present")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to query turns: {e}")))?;
        let present: i64 = row.get("present");
        Ok(present != 0)
    }

    async fn conversation_count(&self) -> Result<usize, HistoryError> {
        let row = sqlx::query("SELECT COUNT(DISTINCT conversation_id) AS n FROM turns")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to count conversations: {e}")))?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }
}
