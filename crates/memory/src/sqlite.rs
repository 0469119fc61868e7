//! SQLite store.
//!
//! One database file with three tables:
//! - `threads` stores conversations and works, with their ordered turn ids
//! - `turns` stores authored messages
//! - `chunks` stores indexed fragments with little-endian f32 embedding blobs
//!
//! A chunk's scope is kept in two nullable columns (`conversation_id`,
//! `work_id`); at most one is set and legacy rows may have neither.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use storyloom_core::error::RepositoryError;
use storyloom_core::{
    ChunkKind, ChunkStore, Role, StoredChunk, Thread, ThreadKind, ThreadRef, ThreadRepository,
    Turn, TurnRepository,
};
use tracing::{debug, info};

/// A SQLite-backed store implementing every repository trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, RepositoryError> {
        let in_memory = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| RepositoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RepositoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), RepositoryError> {
        let statements = [
            (
                "threads table",
                r#"
                CREATE TABLE IF NOT EXISTS threads (
                    id          TEXT NOT NULL,
                    kind        TEXT NOT NULL,
                    user_id     TEXT NOT NULL,
                    title       TEXT NOT NULL DEFAULT '',
                    turn_ids    TEXT NOT NULL DEFAULT '[]',
                    created_at  TEXT NOT NULL,
                    updated_at  TEXT NOT NULL,
                    PRIMARY KEY (kind, id)
                )
                "#,
            ),
            (
                "turns table",
                r#"
                CREATE TABLE IF NOT EXISTS turns (
                    id           TEXT PRIMARY KEY NOT NULL,
                    thread_kind  TEXT NOT NULL,
                    thread_id    TEXT NOT NULL,
                    user_id      TEXT NOT NULL,
                    role         TEXT NOT NULL,
                    content      TEXT NOT NULL DEFAULT '',
                    model        TEXT NOT NULL DEFAULT '',
                    created_at   TEXT NOT NULL,
                    updated_at   TEXT NOT NULL
                )
                "#,
            ),
            (
                "turns index",
                "CREATE INDEX IF NOT EXISTS idx_turns_thread ON turns(thread_kind, thread_id, created_at DESC)",
            ),
            (
                "chunks table",
                r#"
                CREATE TABLE IF NOT EXISTS chunks (
                    id               TEXT PRIMARY KEY NOT NULL,
                    user_id          TEXT NOT NULL,
                    conversation_id  TEXT,
                    work_id          TEXT,
                    turn_id          TEXT NOT NULL,
                    content          TEXT NOT NULL,
                    embedding        BLOB,
                    role             TEXT NOT NULL,
                    kind             TEXT NOT NULL,
                    start_offset     INTEGER NOT NULL,
                    end_offset       INTEGER NOT NULL,
                    created_at       TEXT NOT NULL
                )
                "#,
            ),
            (
                "chunks user index",
                "CREATE INDEX IF NOT EXISTS idx_chunks_user ON chunks(user_id)",
            ),
            (
                "chunks turn index",
                "CREATE INDEX IF NOT EXISTS idx_chunks_turn ON chunks(turn_id)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Serialize an embedding vector to bytes.
    fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Fixed-width RFC 3339 so text ordering matches time ordering.
    fn timestamp(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, RepositoryError>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| RepositoryError::QueryFailed(format!("{name} column: {e}")))
    }

    fn row_to_thread(row: &sqlx::sqlite::SqliteRow) -> Result<Thread, RepositoryError> {
        let kind: String = Self::column(row, "kind")?;
        let turn_ids: String = Self::column(row, "turn_ids")?;
        Ok(Thread {
            id: Self::column(row, "id")?,
            kind: ThreadKind::from_str(&kind).map_err(RepositoryError::QueryFailed)?,
            user_id: Self::column(row, "user_id")?,
            title: Self::column(row, "title")?,
            turn_ids: serde_json::from_str(&turn_ids).unwrap_or_default(),
            created_at: Self::parse_time(&Self::column::<String>(row, "created_at")?),
            updated_at: Self::parse_time(&Self::column::<String>(row, "updated_at")?),
        })
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, RepositoryError> {
        let kind: String = Self::column(row, "thread_kind")?;
        let role: String = Self::column(row, "role")?;
        Ok(Turn {
            id: Self::column(row, "id")?,
            thread: ThreadRef::new(
                ThreadKind::from_str(&kind).map_err(RepositoryError::QueryFailed)?,
                Self::column::<String>(row, "thread_id")?,
            ),
            user_id: Self::column(row, "user_id")?,
            role: Role::from_str(&role).map_err(RepositoryError::QueryFailed)?,
            content: Self::column(row, "content")?,
            model: Self::column(row, "model")?,
            created_at: Self::parse_time(&Self::column::<String>(row, "created_at")?),
            updated_at: Self::parse_time(&Self::column::<String>(row, "updated_at")?),
        })
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<StoredChunk, RepositoryError> {
        let conversation_id: Option<String> = Self::column(row, "conversation_id")?;
        let work_id: Option<String> = Self::column(row, "work_id")?;
        let thread = match (conversation_id, work_id) {
            (Some(id), _) if !id.is_empty() => Some(ThreadRef::conversation(id)),
            (_, Some(id)) if !id.is_empty() => Some(ThreadRef::work(id)),
            _ => None,
        };
        let embedding: Option<Vec<u8>> = Self::column(row, "embedding")?;
        let role: String = Self::column(row, "role")?;
        let kind: String = Self::column(row, "kind")?;
        let start: i64 = Self::column(row, "start_offset")?;
        let end: i64 = Self::column(row, "end_offset")?;

        Ok(StoredChunk {
            id: Self::column(row, "id")?,
            user_id: Self::column(row, "user_id")?,
            thread,
            turn_id: Self::column(row, "turn_id")?,
            content: Self::column(row, "content")?,
            embedding: embedding
                .as_deref()
                .map(Self::blob_to_embedding)
                .unwrap_or_default(),
            role: Role::from_str(&role).map_err(RepositoryError::QueryFailed)?,
            kind: ChunkKind::from_str(&kind).map_err(RepositoryError::QueryFailed)?,
            start: start.max(0) as usize,
            end: end.max(0) as usize,
            created_at: Self::parse_time(&Self::column::<String>(row, "created_at")?),
        })
    }
}

#[async_trait]
impl ThreadRepository for SqliteStore {
    async fn create_thread(&self, thread: &Thread) -> Result<(), RepositoryError> {
        let turn_ids = serde_json::to_string(&thread.turn_ids)
            .map_err(|e| RepositoryError::Storage(format!("turn_ids serialization: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO threads (id, kind, user_id, title, turn_ids, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&thread.id)
        .bind(thread.kind.as_str())
        .bind(&thread.user_id)
        .bind(&thread.title)
        .bind(turn_ids)
        .bind(Self::timestamp(&thread.created_at))
        .bind(Self::timestamp(&thread.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(format!("Insert thread: {e}")))?;
        Ok(())
    }

    async fn get_thread(
        &self,
        thread: &ThreadRef,
        user_id: &str,
    ) -> Result<Option<Thread>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM threads WHERE kind = ?1 AND id = ?2 AND user_id = ?3")
            .bind(thread.kind.as_str())
            .bind(&thread.id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::QueryFailed(format!("Get thread: {e}")))?;
        row.as_ref().map(Self::row_to_thread).transpose()
    }

    async fn append_turn_id(&self, thread: &ThreadRef, turn_id: &str) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Storage(format!("Begin transaction: {e}")))?;

        let raw: Option<String> =
            sqlx::query_scalar("SELECT turn_ids FROM threads WHERE kind = ?1 AND id = ?2")
                .bind(thread.kind.as_str())
                .bind(&thread.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| RepositoryError::QueryFailed(format!("Read turn ids: {e}")))?;
        let raw = raw.ok_or_else(|| RepositoryError::not_found("thread", thread.id.clone()))?;

        let mut ids: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        ids.push(turn_id.to_string());
        let encoded = serde_json::to_string(&ids)
            .map_err(|e| RepositoryError::Storage(format!("turn_ids serialization: {e}")))?;

        sqlx::query("UPDATE threads SET turn_ids = ?1, updated_at = ?2 WHERE kind = ?3 AND id = ?4")
            .bind(encoded)
            .bind(Self::timestamp(&Utc::now()))
            .bind(thread.kind.as_str())
            .bind(&thread.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Append turn id: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Storage(format!("Commit: {e}")))
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM threads WHERE kind = ?1 AND id = ?2")
            .bind(thread.kind.as_str())
            .bind(&thread.id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Delete thread: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TurnRepository for SqliteStore {
    async fn create_turn(&self, turn: &Turn) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO turns (id, thread_kind, thread_id, user_id, role, content, model, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&turn.id)
        .bind(turn.thread.kind.as_str())
        .bind(&turn.thread.id)
        .bind(&turn.user_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&turn.model)
        .bind(Self::timestamp(&turn.created_at))
        .bind(Self::timestamp(&turn.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(format!("Insert turn: {e}")))?;
        Ok(())
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM turns WHERE id = ?1")
            .bind(turn_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::QueryFailed(format!("Get turn: {e}")))?;
        row.as_ref().map(Self::row_to_turn).transpose()
    }

    async fn append_content(&self, turn_id: &str, suffix: &str) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE turns SET content = content || ?1, updated_at = ?2 WHERE id = ?3")
                .bind(suffix)
                .bind(Self::timestamp(&Utc::now()))
                .bind(turn_id)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(format!("Append content: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("turn", turn_id));
        }
        Ok(())
    }

    async fn list_recent(&self, thread: &ThreadRef, limit: usize) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM turns
            WHERE thread_kind = ?1 AND thread_id = ?2
            ORDER BY created_at DESC
            LIMIT ?3
            "#,
        )
        .bind(thread.kind.as_str())
        .bind(&thread.id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::QueryFailed(format!("List recent turns: {e}")))?;
        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn delete_turn(&self, turn_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM turns WHERE id = ?1")
            .bind(turn_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Delete turn: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_turns_by_thread(&self, thread: &ThreadRef) -> Result<usize, RepositoryError> {
        let result = sqlx::query("DELETE FROM turns WHERE thread_kind = ?1 AND thread_id = ?2")
            .bind(thread.kind.as_str())
            .bind(&thread.id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Delete turns: {e}")))?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn create_chunk(&self, chunk: &StoredChunk) -> Result<(), RepositoryError> {
        let conversation_id = chunk.thread.as_ref().and_then(|t| t.conversation_id());
        let work_id = chunk.thread.as_ref().and_then(|t| t.work_id());
        sqlx::query(
            r#"
            INSERT INTO chunks (id, user_id, conversation_id, work_id, turn_id, content, embedding,
                                role, kind, start_offset, end_offset, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.user_id)
        .bind(conversation_id)
        .bind(work_id)
        .bind(&chunk.turn_id)
        .bind(&chunk.content)
        .bind(Self::embedding_to_blob(&chunk.embedding))
        .bind(chunk.role.as_str())
        .bind(chunk.kind.as_str())
        .bind(chunk.start as i64)
        .bind(chunk.end as i64)
        .bind(Self::timestamp(&chunk.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(format!("Insert chunk: {e}")))?;
        Ok(())
    }

    async fn delete_chunks_by_turn(&self, turn_id: &str) -> Result<usize, RepositoryError> {
        let result = sqlx::query("DELETE FROM chunks WHERE turn_id = ?1")
            .bind(turn_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Delete chunks: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_chunks_by_thread(&self, thread: &ThreadRef) -> Result<usize, RepositoryError> {
        let column = match thread.kind {
            ThreadKind::Conversation => "conversation_id",
            ThreadKind::Work => "work_id",
        };
        let sql = format!("DELETE FROM chunks WHERE {column} = ?1");
        let result = sqlx::query(&sql)
            .bind(&thread.id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Delete chunks: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn query_candidates(
        &self,
        user_id: &str,
        exclude: Option<&ThreadRef>,
    ) -> Result<Vec<StoredChunk>, RepositoryError> {
        let exclude_conversation = exclude.and_then(|t| t.conversation_id());
        let exclude_work = exclude.and_then(|t| t.work_id());

        // NULL or empty scope columns never match an exclusion.
        let rows = sqlx::query(
            r#"
            SELECT * FROM chunks
            WHERE user_id = ?1
              AND embedding IS NOT NULL AND length(embedding) > 0
              AND (?2 IS NULL OR conversation_id IS NULL OR conversation_id != ?2)
              AND (?3 IS NULL OR work_id IS NULL OR work_id != ?3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(exclude_conversation)
        .bind(exclude_work)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::QueryFailed(format!("Query candidates: {e}")))?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn count_chunks_for_turn(&self, turn_id: &str) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE turn_id = ?1")
            .bind(turn_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::QueryFailed(format!("Count chunks: {e}")))?;
        Ok(count as usize)
    }
}
