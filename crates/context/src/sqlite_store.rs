//! SQLite session storage — a single `sessions` table keyed by id.
//!
//! `messages` and `metadata` are stored as JSON-serialized columns;
//! timestamps are RFC-3339 text. WAL mode keeps concurrent reads cheap.

use crate::storage::SessionStorage;
use async_trait::async_trait;
use chrono::Utc;
use ferrocode_core::error::StorageError;
use ferrocode_core::message::Message;
use ferrocode_core::session::SessionContext;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at the given path and run migrations.
    /// Pass `":memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &Path) -> std::result::Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Io(format!("failed to create storage directory: {e}"))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&path.to_string_lossy())
            .map_err(|e| StorageError::Io(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Io(format!("failed to open SQLite: {e}")))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        info!(path = %path.display(), "SQLite session storage initialized");
        Ok(storage)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> std::result::Result<Self, StorageError> {
        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> std::result::Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id                 TEXT PRIMARY KEY,
                messages           TEXT NOT NULL DEFAULT '[]',
                compressed_history TEXT NOT NULL DEFAULT '',
                metadata           TEXT NOT NULL DEFAULT '{}',
                created_at         TEXT NOT NULL,
                last_activity      TEXT NOT NULL,
                total_tokens       INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_last_activity ON sessions(last_activity DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("last_activity index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<SessionContext, StorageError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StorageError::QueryFailed(format!("id column: {e}")))?;
        let messages_json: String = row
            .try_get("messages")
            .map_err(|e| StorageError::QueryFailed(format!("messages column: {e}")))?;
        let compressed_history: String = row
            .try_get("compressed_history")
            .map_err(|e| StorageError::QueryFailed(format!("compressed_history column: {e}")))?;
        let metadata_json: String = row
            .try_get("metadata")
            .map_err(|e| StorageError::QueryFailed(format!("metadata column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StorageError::QueryFailed(format!("created_at column: {e}")))?;
        let last_activity_str: String = row
            .try_get("last_activity")
            .map_err(|e| StorageError::QueryFailed(format!("last_activity column: {e}")))?;
        let total_tokens: i64 = row.try_get("total_tokens").unwrap_or(0);

        let messages: Vec<Message> = serde_json::from_str(&messages_json)
            .map_err(|e| StorageError::Serialization(format!("messages column: {e}")))?;
        let metadata: HashMap<String, String> =
            serde_json::from_str(&metadata_json).unwrap_or_default();

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let last_activity = chrono::DateTime::parse_from_rfc3339(&last_activity_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(SessionContext {
            id,
            messages,
            compressed_history,
            metadata,
            created_at,
            last_activity,
            total_tokens: total_tokens as usize,
        })
    }
}

#[async_trait]
impl SessionStorage for SqliteStorage {
    async fn save_session(
        &self,
        session: &SessionContext,
    ) -> std::result::Result<(), StorageError> {
        let messages = serde_json::to_string(&session.messages)
            .map_err(|e| StorageError::Serialization(format!("messages: {e}")))?;
        let metadata = serde_json::to_string(&session.metadata)
            .map_err(|e| StorageError::Serialization(format!("metadata: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, messages, compressed_history, metadata, created_at, last_activity, total_tokens)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                messages = excluded.messages,
                compressed_history = excluded.compressed_history,
                metadata = excluded.metadata,
                last_activity = excluded.last_activity,
                total_tokens = excluded.total_tokens
            "#,
        )
        .bind(&session.id)
        .bind(&messages)
        .bind(&session.compressed_history)
        .bind(&metadata)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity.to_rfc3339())
        .bind(session.total_tokens as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("save session: {e}")))?;

        Ok(())
    }

    async fn load_session(
        &self,
        session_id: &str,
    ) -> std::result::Result<Option<SessionContext>, StorageError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("load session: {e}")))?;

        row.map(|r| Self::row_to_session(&r)).transpose()
    }

    async fn load_all_sessions(
        &self,
    ) -> std::result::Result<HashMap<String, SessionContext>, StorageError> {
        let rows = sqlx::query("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("load all sessions: {e}")))?;

        let mut sessions = HashMap::new();
        for row in &rows {
            match Self::row_to_session(row) {
                Ok(session) => {
                    sessions.insert(session.id.clone(), session);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable session row");
                }
            }
        }
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> std::result::Result<(), StorageError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("delete session: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> std::result::Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}
