//! SQLite backend for chunks, collections, files, and conversation messages.
//!
//! Uses a single SQLite database file with four tables:
//! - `collections` — named partitions, each pinned to one embedding model
//! - `files` — source files per collection, unique by name
//! - `chunks` — text fields plus seven nullable vector columns (f32 blobs)
//! - `conversations` / `messages` — the append-only conversation log
//!
//! Nearest-neighbor queries scan the non-null vectors of one column within a
//! collection and rank them by L2 distance in process.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tether_core::chunk::{
    Chunk, ChunkContent, Collection, EmbeddingField, FieldEmbeddings, FileChunk, FileRecord,
    KnnQuery, NewChunk, NewCollection, NewFile, validate_chunk_write,
};
use tether_core::error::StoreError;
use tether_core::message::{ConversationId, Message, NewMessage, Role};
use tether_core::store::{ChunkStore, MessageStore};
use tracing::{debug, info};

use crate::vector::{blob_to_vector, l2_distance, rank_by_distance, vector_to_blob};

const CHUNK_COLUMNS: &str = "id, collection_id, file_id, user_id, primary_text, summary, \
     question_1, question_2, question_3, question_4, question_5, \
     embedding_primary, embedding_summary, embedding_q1, embedding_q2, embedding_q3, \
     embedding_q4, embedding_q5, embedding_model_name, metadata, created_at";

/// Connection settings for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    /// File path, or `":memory:"` for an ephemeral database
    pub path: String,
    pub max_connections: u32,
    /// Bound on pool acquisition and on waiting for a locked database
    pub query_timeout: Duration,
}

impl SqliteStoreOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            max_connections: 4,
            query_timeout: Duration::from_secs(5),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    fn is_in_memory(&self) -> bool {
        matches!(self.path.as_str(), ":memory:" | "sqlite::memory:")
    }
}

/// A production SQLite store implementing [`ChunkStore`] and [`MessageStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    query_timeout_ms: u64,
}

impl SqliteStore {
    /// Open (or create) the database at `path` with default options.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        Self::open(SqliteStoreOptions::new(path)).await
    }

    /// Open the database; all tables and indexes are created automatically.
    ///
    /// An in-memory database lives on a single pooled connection that is
    /// never recycled, since every new connection would see an empty schema.
    pub async fn open(options: SqliteStoreOptions) -> Result<Self, StoreError> {
        let in_memory = options.is_in_memory();
        let connect = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
        } else {
            SqliteConnectOptions::new()
                .filename(&options.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        let connect = connect
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.query_timeout)
            .pragma("foreign_keys", "ON");

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(options.query_timeout)
            .max_connections(if in_memory { 1 } else { options.max_connections.max(1) });
        if in_memory {
            pool_options = pool_options
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options
            .connect_with(connect)
            .await
            .map_err(|e| StoreError::Transient(format!("Failed to open SQLite: {e}")))?;

        let store = Self {
            pool,
            query_timeout_ms: options.query_timeout.as_millis() as u64,
        };
        store.run_migrations().await?;
        info!("SQLite store initialized at {}", options.path);
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            query_timeout_ms: 5000,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations: creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: [(&str, &str); 8] = [
            (
                "collections table",
                r#"
                CREATE TABLE IF NOT EXISTS collections (
                    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                    name                 TEXT UNIQUE NOT NULL,
                    embedding_model_name TEXT NOT NULL,
                    embedding_dimensions INTEGER NOT NULL,
                    created_at           TEXT NOT NULL
                )
                "#,
            ),
            (
                "files table",
                r#"
                CREATE TABLE IF NOT EXISTS files (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
                    user_id       INTEGER,
                    file_name     TEXT NOT NULL,
                    file_hash     TEXT NOT NULL,
                    created_at    TEXT NOT NULL,
                    UNIQUE (collection_id, file_name)
                )
                "#,
            ),
            (
                "chunks table",
                r#"
                CREATE TABLE IF NOT EXISTS chunks (
                    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                    collection_id        INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
                    file_id              INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                    user_id              INTEGER,
                    primary_text         TEXT NOT NULL,
                    summary              TEXT,
                    question_1           TEXT,
                    question_2           TEXT,
                    question_3           TEXT,
                    question_4           TEXT,
                    question_5           TEXT,
                    embedding_primary    BLOB,
                    embedding_summary    BLOB,
                    embedding_q1         BLOB,
                    embedding_q2         BLOB,
                    embedding_q3         BLOB,
                    embedding_q4         BLOB,
                    embedding_q5         BLOB,
                    embedding_model_name TEXT NOT NULL,
                    metadata             TEXT NOT NULL DEFAULT '{}',
                    created_at           TEXT NOT NULL
                )
                "#,
            ),
            (
                "chunks index",
                "CREATE INDEX IF NOT EXISTS idx_chunks_collection_file ON chunks(collection_id, file_id)",
            ),
            (
                "conversations table",
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id         TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id TEXT NOT NULL REFERENCES conversations(id),
                    role            TEXT NOT NULL,
                    text            TEXT NOT NULL,
                    created_at      TEXT NOT NULL,
                    is_deleted      INTEGER NOT NULL DEFAULT 0
                )
                "#,
            ),
            (
                "messages index",
                "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, id)",
            ),
            (
                "files index",
                "CREATE INDEX IF NOT EXISTS idx_files_collection ON files(collection_id)",
            ),
        ];

        for (label, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Map a driver error for `operation` onto the store error classes.
    fn db_err(&self, operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
        let after_ms = self.query_timeout_ms;
        move |e| classify_error(operation, after_ms, e)
    }

    async fn require_collection(&self, id: i64) -> Result<Collection, StoreError> {
        self.get_collection(id)
            .await?
            .ok_or_else(|| StoreError::not_found("collection", id))
    }

    fn row_to_collection(row: &SqliteRow) -> Result<Collection, StoreError> {
        let dims: i64 = get(row, "embedding_dimensions")?;
        Ok(Collection {
            id: get(row, "id")?,
            name: get(row, "name")?,
            embedding_model_name: get(row, "embedding_model_name")?,
            embedding_dimensions: dims.max(0) as usize,
            created_at: parse_timestamp(&get::<String>(row, "created_at")?),
        })
    }

    fn row_to_file(row: &SqliteRow) -> Result<FileRecord, StoreError> {
        Ok(FileRecord {
            id: get(row, "id")?,
            collection_id: get(row, "collection_id")?,
            user_id: get(row, "user_id")?,
            file_name: get(row, "file_name")?,
            file_hash: get(row, "file_hash")?,
            created_at: parse_timestamp(&get::<String>(row, "created_at")?),
        })
    }

    fn row_to_chunk(row: &SqliteRow) -> Result<Chunk, StoreError> {
        let mut questions: Vec<Option<String>> = Vec::with_capacity(5);
        for field in EmbeddingField::ALL.into_iter().filter(|f| f.is_question()) {
            questions.push(get(row, field.text_column())?);
        }
        while matches!(questions.last(), Some(None)) {
            questions.pop();
        }

        let content = ChunkContent {
            primary_text: get(row, "primary_text")?,
            summary: get(row, "summary")?,
            questions: questions.into_iter().map(Option::unwrap_or_default).collect(),
        };

        let mut embeddings = FieldEmbeddings::new();
        for field in EmbeddingField::ALL {
            let blob: Option<Vec<u8>> = get(row, field.embedding_column())?;
            if let Some(blob) = blob {
                embeddings.insert(field, blob_to_vector(&blob)?);
            }
        }

        let metadata_json: String = get(row, "metadata")?;
        let metadata = serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null);

        Ok(Chunk {
            id: get(row, "id")?,
            collection_id: get(row, "collection_id")?,
            file_id: get(row, "file_id")?,
            user_id: get(row, "user_id")?,
            content,
            embeddings,
            embedding_model_name: get(row, "embedding_model_name")?,
            metadata,
            created_at: parse_timestamp(&get::<String>(row, "created_at")?),
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
        let role_name: String = get(row, "role")?;
        let role = Role::parse(&role_name)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown message role '{role_name}'")))?;
        let conversation_id: String = get(row, "conversation_id")?;
        let is_deleted: i64 = get(row, "is_deleted")?;
        Ok(Message {
            id: get(row, "id")?,
            conversation_id: ConversationId(conversation_id),
            role,
            text: get(row, "text")?,
            created_at: parse_timestamp(&get::<String>(row, "created_at")?),
            is_deleted: is_deleted != 0,
        })
    }
}

/// Read one column, mapping decode failures to `QueryFailed`.
fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn classify_error(operation: &str, after_ms: u64, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut => StoreError::Timeout {
            operation: operation.to_string(),
            after_ms,
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StoreError::Transient(format!("{operation}: {e}"))
        }
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{operation}: {db}"))
        }
        // SQLITE_BUSY / SQLITE_LOCKED after busy_timeout elapsed
        sqlx::Error::Database(ref db) if matches!(db.code().as_deref(), Some("5" | "6")) => {
            StoreError::Timeout {
                operation: operation.to_string(),
                after_ms,
            }
        }
        other => StoreError::QueryFailed(format!("{operation}: {other}")),
    }
}

/// Text column values for the five question slots.
fn question_columns(content: &ChunkContent) -> [Option<&str>; 5] {
    std::array::from_fn(|i| content.questions.get(i).map(String::as_str))
}

/// Blob column values for all seven vector slots, in `EmbeddingField::ALL` order.
fn embedding_columns(embeddings: &FieldEmbeddings) -> [Option<Vec<u8>>; 7] {
    EmbeddingField::ALL.map(|f| embeddings.get(f).map(vector_to_blob))
}

/// Insert one validated chunk row on `conn`, which may be a transaction.
async fn insert_chunk_row(conn: &mut SqliteConnection, new: NewChunk) -> Result<Chunk, sqlx::Error> {
    let created_at = Utc::now();
    let questions = question_columns(&new.content);
    let [e_primary, e_summary, e_q1, e_q2, e_q3, e_q4, e_q5] = embedding_columns(&new.embeddings);
    let metadata =
        serde_json::to_string(&new.metadata).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO chunks (
            collection_id, file_id, user_id, primary_text, summary,
            question_1, question_2, question_3, question_4, question_5,
            embedding_primary, embedding_summary,
            embedding_q1, embedding_q2, embedding_q3, embedding_q4, embedding_q5,
            embedding_model_name, metadata, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
        "#,
    )
    .bind(new.collection_id)
    .bind(new.file_id)
    .bind(new.user_id)
    .bind(&new.content.primary_text)
    .bind(new.content.summary.as_deref())
    .bind(questions[0])
    .bind(questions[1])
    .bind(questions[2])
    .bind(questions[3])
    .bind(questions[4])
    .bind(e_primary)
    .bind(e_summary)
    .bind(e_q1)
    .bind(e_q2)
    .bind(e_q3)
    .bind(e_q4)
    .bind(e_q5)
    .bind(&new.embedding_model_name)
    .bind(&metadata)
    .bind(created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(Chunk {
        id: result.last_insert_rowid(),
        collection_id: new.collection_id,
        file_id: new.file_id,
        user_id: new.user_id,
        content: new.content,
        embeddings: new.embeddings,
        embedding_model_name: new.embedding_model_name,
        metadata: new.metadata,
        created_at,
    })
}

#[async_trait]
impl ChunkStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_collection(&self, new: NewCollection) -> Result<Collection, StoreError> {
        if new.name.trim().is_empty() {
            return Err(StoreError::InvalidChunk("collection name must not be empty".into()));
        }
        if new.embedding_dimensions == 0 {
            return Err(StoreError::InvalidChunk(
                "collection embedding dimensions must be > 0".into(),
            ));
        }
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO collections (name, embedding_model_name, embedding_dimensions, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&new.name)
        .bind(&new.embedding_model_name)
        .bind(new.embedding_dimensions as i64)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(self.db_err("create collection"))?;

        let id = result.last_insert_rowid();
        debug!(collection_id = id, name = %new.name, "Created collection");
        Ok(Collection {
            id,
            name: new.name,
            embedding_model_name: new.embedding_model_name,
            embedding_dimensions: new.embedding_dimensions,
            created_at,
        })
    }

    async fn get_collection(&self, id: i64) -> Result<Option<Collection>, StoreError> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.db_err("get collection"))?;
        row.as_ref().map(Self::row_to_collection).transpose()
    }

    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let row = sqlx::query("SELECT * FROM collections WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.db_err("get collection by name"))?;
        row.as_ref().map(Self::row_to_collection).transpose()
    }

    async fn list_collections(&self) -> Result<Vec<Collection>, StoreError> {
        let rows = sqlx::query("SELECT * FROM collections ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(self.db_err("list collections"))?;
        rows.iter().map(Self::row_to_collection).collect()
    }

    async fn create_file(&self, new: NewFile) -> Result<FileRecord, StoreError> {
        self.require_collection(new.collection_id).await?;
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO files (collection_id, user_id, file_name, file_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(new.collection_id)
        .bind(new.user_id)
        .bind(&new.file_name)
        .bind(&new.file_hash)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(self.db_err("create file"))?;

        Ok(FileRecord {
            id: result.last_insert_rowid(),
            collection_id: new.collection_id,
            user_id: new.user_id,
            file_name: new.file_name,
            file_hash: new.file_hash,
            created_at,
        })
    }

    async fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.db_err("get file"))?;
        row.as_ref().map(Self::row_to_file).transpose()
    }

    async fn get_file_by_name(
        &self,
        collection_id: i64,
        file_name: &str,
    ) -> Result<Option<FileRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE collection_id = ?1 AND file_name = ?2")
            .bind(collection_id)
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.db_err("get file by name"))?;
        row.as_ref().map(Self::row_to_file).transpose()
    }

    async fn list_files(&self, collection_id: i64) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM files WHERE collection_id = ?1 ORDER BY id")
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(self.db_err("list files"))?;
        rows.iter().map(Self::row_to_file).collect()
    }

    async fn delete_file(&self, file_id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(self.db_err("delete file"))?;
        let chunks = sqlx::query("DELETE FROM chunks WHERE file_id = ?1")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(self.db_err("delete file chunks"))?;
        let files = sqlx::query("DELETE FROM files WHERE id = ?1")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(self.db_err("delete file"))?;
        tx.commit().await.map_err(self.db_err("delete file"))?;

        debug!(
            file_id,
            chunks = chunks.rows_affected(),
            "Deleted file"
        );
        Ok(files.rows_affected() > 0)
    }

    async fn write_file(
        &self,
        new: NewFile,
        chunks: Vec<FileChunk>,
    ) -> Result<(FileRecord, Vec<Chunk>), StoreError> {
        let collection = self.require_collection(new.collection_id).await?;
        for chunk in &chunks {
            validate_chunk_write(
                &collection,
                &chunk.content,
                &chunk.embeddings,
                &chunk.embedding_model_name,
            )?;
        }

        let mut tx = self.pool.begin().await.map_err(self.db_err("write file"))?;
        let replaced = sqlx::query("SELECT id FROM files WHERE collection_id = ?1 AND file_name = ?2")
            .bind(new.collection_id)
            .bind(&new.file_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(self.db_err("write file"))?;
        if let Some(row) = replaced {
            let old_id: i64 = get(&row, "id")?;
            sqlx::query("DELETE FROM chunks WHERE file_id = ?1")
                .bind(old_id)
                .execute(&mut *tx)
                .await
                .map_err(self.db_err("write file"))?;
            sqlx::query("DELETE FROM files WHERE id = ?1")
                .bind(old_id)
                .execute(&mut *tx)
                .await
                .map_err(self.db_err("write file"))?;
            debug!(file_id = old_id, file = %new.file_name, "Replacing file");
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO files (collection_id, user_id, file_name, file_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(new.collection_id)
        .bind(new.user_id)
        .bind(&new.file_name)
        .bind(&new.file_hash)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(self.db_err("write file"))?;
        let file = FileRecord {
            id: result.last_insert_rowid(),
            collection_id: new.collection_id,
            user_id: new.user_id,
            file_name: new.file_name,
            file_hash: new.file_hash,
            created_at,
        };

        let mut stored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk = insert_chunk_row(&mut *tx, chunk.into_new_chunk(collection.id, file.id))
                .await
                .map_err(self.db_err("write file chunks"))?;
            stored.push(chunk);
        }
        // Dropping the transaction before this point rolls everything back.
        tx.commit().await.map_err(self.db_err("write file"))?;

        debug!(file_id = file.id, chunks = stored.len(), "Wrote file");
        Ok((file, stored))
    }

    async fn insert_chunk(&self, new: NewChunk) -> Result<Chunk, StoreError> {
        let collection = self.require_collection(new.collection_id).await?;
        let file = self
            .get_file(new.file_id)
            .await?
            .ok_or_else(|| StoreError::not_found("file", new.file_id))?;
        if file.collection_id != collection.id {
            return Err(StoreError::InvalidChunk(format!(
                "file {} belongs to collection {}, not {}",
                file.id, file.collection_id, collection.id
            )));
        }
        validate_chunk_write(
            &collection,
            &new.content,
            &new.embeddings,
            &new.embedding_model_name,
        )?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(self.db_err("insert chunk"))?;
        let chunk = insert_chunk_row(&mut *conn, new)
            .await
            .map_err(self.db_err("insert chunk"))?;
        debug!(
            chunk_id = chunk.id,
            collection_id = chunk.collection_id,
            fields = chunk.embeddings.len(),
            "Inserted chunk"
        );
        Ok(chunk)
    }

    async fn replace_chunk_content(
        &self,
        chunk_id: i64,
        content: ChunkContent,
        embeddings: FieldEmbeddings,
    ) -> Result<Chunk, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(self.db_err("replace chunk content"))?;

        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(chunk_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(self.db_err("replace chunk content"))?;
        let existing = row
            .as_ref()
            .map(Self::row_to_chunk)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("chunk", chunk_id))?;
        let row = sqlx::query("SELECT * FROM collections WHERE id = ?1")
            .bind(existing.collection_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(self.db_err("replace chunk content"))?;
        let collection = row
            .as_ref()
            .map(Self::row_to_collection)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("collection", existing.collection_id))?;
        validate_chunk_write(
            &collection,
            &content,
            &embeddings,
            &existing.embedding_model_name,
        )?;

        let questions = question_columns(&content);
        let [e_primary, e_summary, e_q1, e_q2, e_q3, e_q4, e_q5] = embedding_columns(&embeddings);

        // Texts and vectors change together in one statement.
        let result = sqlx::query(
            r#"
            UPDATE chunks SET
                primary_text = ?2, summary = ?3,
                question_1 = ?4, question_2 = ?5, question_3 = ?6, question_4 = ?7, question_5 = ?8,
                embedding_primary = ?9, embedding_summary = ?10,
                embedding_q1 = ?11, embedding_q2 = ?12, embedding_q3 = ?13,
                embedding_q4 = ?14, embedding_q5 = ?15
            WHERE id = ?1
            "#,
        )
        .bind(chunk_id)
        .bind(&content.primary_text)
        .bind(content.summary.as_deref())
        .bind(questions[0])
        .bind(questions[1])
        .bind(questions[2])
        .bind(questions[3])
        .bind(questions[4])
        .bind(e_primary)
        .bind(e_summary)
        .bind(e_q1)
        .bind(e_q2)
        .bind(e_q3)
        .bind(e_q4)
        .bind(e_q5)
        .execute(&mut *tx)
        .await
        .map_err(self.db_err("replace chunk content"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("chunk", chunk_id));
        }
        tx.commit()
            .await
            .map_err(self.db_err("replace chunk content"))?;

        Ok(Chunk {
            content,
            embeddings,
            ..existing
        })
    }

    async fn get_chunk(&self, id: i64) -> Result<Option<Chunk>, StoreError> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.db_err("get chunk"))?;
        row.as_ref().map(Self::row_to_chunk).transpose()
    }

    async fn list_chunks(
        &self,
        collection_id: i64,
        file_id: Option<i64>,
    ) -> Result<Vec<Chunk>, StoreError> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks \
             WHERE collection_id = ?1 AND (?2 IS NULL OR file_id = ?2) ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(collection_id)
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .map_err(self.db_err("list chunks"))?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn knn(&self, query: KnnQuery<'_>) -> Result<Vec<(Chunk, f32)>, StoreError> {
        let collection = self.require_collection(query.collection_id).await?;
        if query.vector.len() != collection.embedding_dimensions {
            return Err(StoreError::DimensionMismatch {
                model: collection.embedding_model_name,
                expected: collection.embedding_dimensions,
                actual: query.vector.len(),
            });
        }
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let column = query.field.embedding_column();
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks \
             WHERE collection_id = ?1 AND {column} IS NOT NULL \
             AND (?2 IS NULL OR file_id = ?2) ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(query.collection_id)
            .bind(query.file_id)
            .fetch_all(&self.pool)
            .await
            .map_err(self.db_err("knn"))?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = Self::row_to_chunk(row)?;
            if let Some(vector) = chunk.embeddings.get(query.field) {
                let distance = l2_distance(vector, query.vector);
                candidates.push((chunk, distance));
            }
        }

        debug!(
            collection_id = query.collection_id,
            field = %query.field,
            scanned = candidates.len(),
            "knn scan complete"
        );
        Ok(rank_by_distance(candidates, query.top_k))
    }

    async fn keyword_search(
        &self,
        collection_id: i64,
        terms: &[String],
        top_k: usize,
        file_id: Option<i64>,
    ) -> Result<Vec<Chunk>, StoreError> {
        let terms: Vec<String> = terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        // ?1 collection, ?2 file filter, ?3 limit, terms from ?4 on
        let conditions: Vec<String> = (0..terms.len())
            .map(|i| format!("instr(lower(primary_text), lower(?{})) > 0", i + 4))
            .collect();
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks \
             WHERE collection_id = ?1 AND (?2 IS NULL OR file_id = ?2) AND ({}) \
             ORDER BY id LIMIT ?3",
            conditions.join(" OR ")
        );

        let mut db_query = sqlx::query(&sql)
            .bind(collection_id)
            .bind(file_id)
            .bind(top_k as i64);
        for term in &terms {
            db_query = db_query.bind(term);
        }

        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .map_err(self.db_err("keyword search"))?;
        rows.iter().map(Self::row_to_chunk).collect()
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let created_at = Utc::now();
        let stamp = created_at.to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(self.db_err("append message"))?;
        sqlx::query("INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?1, ?2)")
            .bind(new.conversation_id.as_str())
            .bind(&stamp)
            .execute(&mut *tx)
            .await
            .map_err(self.db_err("append message"))?;
        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, role, text, created_at, is_deleted) \
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(new.conversation_id.as_str())
        .bind(new.role.as_str())
        .bind(&new.text)
        .bind(&stamp)
        .execute(&mut *tx)
        .await
        .map_err(self.db_err("append message"))?;
        tx.commit().await.map_err(self.db_err("append message"))?;

        Ok(Message {
            id: result.last_insert_rowid(),
            conversation_id: new.conversation_id,
            role: new.role,
            text: new.text,
            created_at,
            is_deleted: false,
        })
    }

    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ?1 AND is_deleted = 0 ORDER BY id",
        )
        .bind(conversation_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(self.db_err("load messages"))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn soft_delete_message(&self, message_id: i64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE messages SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0")
                .bind(message_id)
                .execute(&self.pool)
                .await
                .map_err(self.db_err("soft delete message"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::chunk::SearchResult;

    async fn test_store() -> SqliteStore {
        SqliteStore::open(SqliteStoreOptions::in_memory()).await.unwrap()
    }

    async fn seed(store: &SqliteStore, dims: usize) -> (Collection, FileRecord) {
        let collection = store
            .create_collection(NewCollection {
                name: "docs".into(),
                embedding_model_name: "m".into(),
                embedding_dimensions: dims,
            })
            .await
            .unwrap();
        let file = store
            .create_file(NewFile {
                collection_id: collection.id,
                user_id: Some(1),
                file_name: "notes.txt".into(),
                file_hash: "abc".into(),
            })
            .await
            .unwrap();
        (collection, file)
    }

    fn primary_only(collection: &Collection, file: &FileRecord, text: &str, v: Vec<f32>) -> NewChunk {
        NewChunk {
            collection_id: collection.id,
            file_id: file.id,
            user_id: Some(1),
            content: ChunkContent::new(text),
            embeddings: [(EmbeddingField::Primary, v)].into_iter().collect(),
            embedding_model_name: collection.embedding_model_name.clone(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn collection_names_are_unique() {
        let store = test_store().await;
        seed(&store, 3).await;
        let err = store
            .create_collection(NewCollection {
                name: "docs".into(),
                embedding_model_name: "m".into(),
                embedding_dimensions: 3,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.list_collections().await.unwrap().len(), 1);
        assert!(store.get_collection_by_name("docs").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_in_missing_collection_is_not_found() {
        let store = test_store().await;
        let err = store
            .create_file(NewFile {
                collection_id: 99,
                user_id: None,
                file_name: "x".into(),
                file_hash: "h".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "collection", .. }));
    }

    #[tokio::test]
    async fn insert_and_read_back_all_fields() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 2).await;
        let content = ChunkContent::new("body text")
            .with_summary("short")
            .with_questions(["q one?", "q two?"]);
        let embeddings: FieldEmbeddings = [
            (EmbeddingField::Primary, vec![1.0, 0.0]),
            (EmbeddingField::Summary, vec![0.0, 1.0]),
            (EmbeddingField::Question1, vec![0.5, 0.5]),
            (EmbeddingField::Question2, vec![0.25, 0.75]),
        ]
        .into_iter()
        .collect();
        let inserted = store
            .insert_chunk(NewChunk {
                collection_id: collection.id,
                file_id: file.id,
                user_id: None,
                content: content.clone(),
                embeddings: embeddings.clone(),
                embedding_model_name: "m".into(),
                metadata: serde_json::json!({"page": 2}),
            })
            .await
            .unwrap();

        let fetched = store.get_chunk(inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, content);
        assert_eq!(fetched.embeddings, embeddings);
        assert_eq!(fetched.metadata["page"], 2);
        assert_eq!(fetched.file_id, file.id);
    }

    #[tokio::test]
    async fn wrong_dimension_write_rejected() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 3).await;
        let err = store
            .insert_chunk(primary_only(&collection, &file, "x", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
        assert!(err.is_fatal());
        assert!(store.list_chunks(collection.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn knn_orders_by_distance_then_id() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 3).await;
        let a = store
            .insert_chunk(primary_only(&collection, &file, "A", vec![0.0, 0.0, 1.0]))
            .await
            .unwrap();
        let b = store
            .insert_chunk(primary_only(&collection, &file, "B", vec![0.0, 0.0, 0.9]))
            .await
            .unwrap();
        let c = store
            .insert_chunk(primary_only(&collection, &file, "C", vec![0.0, 0.0, 0.9]))
            .await
            .unwrap();

        let query = [0.0, 0.0, 1.0];
        let top1 = store
            .knn(KnnQuery {
                collection_id: collection.id,
                field: EmbeddingField::Primary,
                vector: &query,
                top_k: 1,
                file_id: None,
            })
            .await
            .unwrap();
        assert_eq!(top1.len(), 1);
        assert_eq!(top1[0].0.id, a.id);
        assert_eq!(top1[0].1, 0.0);

        let all = store
            .knn(KnnQuery {
                collection_id: collection.id,
                field: EmbeddingField::Primary,
                vector: &query,
                top_k: 10,
                file_id: Some(file.id),
            })
            .await
            .unwrap();
        let ids: Vec<i64> = all.iter().map(|(c, _)| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn knn_skips_chunks_without_field_vector() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 2).await;
        store
            .insert_chunk(primary_only(&collection, &file, "no summary", vec![1.0, 0.0]))
            .await
            .unwrap();
        let hits = store
            .knn(KnnQuery {
                collection_id: collection.id,
                field: EmbeddingField::Summary,
                vector: &[1.0, 0.0],
                top_k: 5,
                file_id: None,
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn knn_rejects_query_of_wrong_dimension() {
        let store = test_store().await;
        let (collection, _) = seed(&store, 3).await;
        let err = store
            .knn(KnnQuery {
                collection_id: collection.id,
                field: EmbeddingField::Primary,
                vector: &[1.0],
                top_k: 5,
                file_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 1, .. }));
    }

    #[tokio::test]
    async fn keyword_search_is_case_insensitive_or_semantics() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 1).await;
        store
            .insert_chunk(primary_only(&collection, &file, "foo bar", vec![1.0]))
            .await
            .unwrap();
        store
            .insert_chunk(primary_only(&collection, &file, "nothing here", vec![1.0]))
            .await
            .unwrap();
        store
            .insert_chunk(primary_only(&collection, &file, "BAZ qux", vec![1.0]))
            .await
            .unwrap();

        let hits = store
            .keyword_search(collection.id, &["Foo".into()], 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content.primary_text, "foo bar");

        let hits = store
            .keyword_search(collection.id, &["foo".into(), "baz".into()], 10, None)
            .await
            .unwrap();
        let texts: Vec<SearchResult> = hits.into_iter().map(SearchResult::keyword).collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[1].chunk.content.primary_text, "BAZ qux");

        let limited = store
            .keyword_search(collection.id, &["foo".into(), "baz".into()], 1, None)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn replace_content_swaps_text_and_vectors_together() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 2).await;
        let chunk = store
            .insert_chunk(primary_only(&collection, &file, "v1", vec![1.0, 0.0]))
            .await
            .unwrap();

        let content = ChunkContent::new("v1").with_summary("added later");
        let embeddings: FieldEmbeddings = [
            (EmbeddingField::Primary, vec![1.0, 0.0]),
            (EmbeddingField::Summary, vec![0.0, 1.0]),
        ]
        .into_iter()
        .collect();
        store
            .replace_chunk_content(chunk.id, content.clone(), embeddings.clone())
            .await
            .unwrap();

        let fetched = store.get_chunk(chunk.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, content);
        assert_eq!(fetched.embeddings, embeddings);

        // A summary without a vector must be refused, leaving the row untouched.
        let stale = ChunkContent::new("v1").with_summary("changed");
        let only_primary: FieldEmbeddings = [(EmbeddingField::Primary, vec![1.0, 0.0])]
            .into_iter()
            .collect();
        assert!(
            store
                .replace_chunk_content(chunk.id, stale, only_primary)
                .await
                .is_err()
        );
        let fetched = store.get_chunk(chunk.id).await.unwrap().unwrap();
        assert_eq!(fetched.content.summary.as_deref(), Some("added later"));
    }

    #[tokio::test]
    async fn delete_file_removes_its_chunks() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 1).await;
        store
            .insert_chunk(primary_only(&collection, &file, "gone", vec![1.0]))
            .await
            .unwrap();
        assert!(store.delete_file(file.id).await.unwrap());
        assert!(store.list_chunks(collection.id, None).await.unwrap().is_empty());
        assert!(store.get_file(file.id).await.unwrap().is_none());
        assert!(!store.delete_file(file.id).await.unwrap());
    }

    fn file_chunk(text: &str, v: Vec<f32>) -> FileChunk {
        FileChunk {
            user_id: None,
            content: ChunkContent::new(text),
            embeddings: [(EmbeddingField::Primary, v)].into_iter().collect(),
            embedding_model_name: "m".into(),
            metadata: serde_json::json!({}),
        }
    }

    fn notes(collection: &Collection, hash: &str) -> NewFile {
        NewFile {
            collection_id: collection.id,
            user_id: None,
            file_name: "notes.txt".into(),
            file_hash: hash.into(),
        }
    }

    #[tokio::test]
    async fn write_file_replaces_same_name_with_all_chunks() {
        let store = test_store().await;
        let (collection, old) = seed(&store, 1).await;
        store
            .insert_chunk(primary_only(&collection, &old, "old body", vec![1.0]))
            .await
            .unwrap();

        let (file, chunks) = store
            .write_file(
                notes(&collection, "def"),
                vec![file_chunk("one", vec![1.0]), file_chunk("two", vec![0.5])],
            )
            .await
            .unwrap();
        assert_ne!(file.id, old.id);
        assert_eq!(file.file_hash, "def");
        assert!(chunks.iter().all(|c| c.file_id == file.id));

        assert!(store.get_file(old.id).await.unwrap().is_none());
        let texts: Vec<String> = store
            .list_chunks(collection.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.content.primary_text)
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn failed_write_file_keeps_previous_version() {
        let store = test_store().await;
        let (collection, old) = seed(&store, 2).await;
        store
            .insert_chunk(primary_only(&collection, &old, "old body", vec![1.0, 0.0]))
            .await
            .unwrap();

        // Second chunk has the wrong dimension: nothing may be written.
        let err = store
            .write_file(
                notes(&collection, "def"),
                vec![file_chunk("ok", vec![1.0, 0.0]), file_chunk("bad", vec![1.0])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));

        let file = store
            .get_file_by_name(collection.id, "notes.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.id, old.id);
        assert_eq!(file.file_hash, "abc");
        let chunks = store.list_chunks(collection.id, None).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.primary_text, "old body");
    }

    #[tokio::test]
    async fn replace_content_of_deleted_chunk_is_not_found() {
        let store = test_store().await;
        let (collection, file) = seed(&store, 1).await;
        let chunk = store
            .insert_chunk(primary_only(&collection, &file, "short lived", vec![1.0]))
            .await
            .unwrap();
        store.delete_file(file.id).await.unwrap();

        let err = store
            .replace_chunk_content(
                chunk.id,
                ChunkContent::new("revived"),
                [(EmbeddingField::Primary, vec![1.0])].into_iter().collect(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "chunk", .. }));
        assert!(store.get_chunk(chunk.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_load_in_order_without_deleted() {
        let store = test_store().await;
        let conv = ConversationId::from("c1");
        let first = store
            .append_message(NewMessage::user(conv.clone(), "hello"))
            .await
            .unwrap();
        store
            .append_message(NewMessage::assistant(conv.clone(), "hi there"))
            .await
            .unwrap();
        store
            .append_message(NewMessage::user(ConversationId::from("other"), "elsewhere"))
            .await
            .unwrap();

        assert!(store.soft_delete_message(first.id).await.unwrap());
        assert!(!store.soft_delete_message(first.id).await.unwrap());

        let loaded = store.load_messages(&conv).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "hi there");
        assert_eq!(loaded[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.sqlite");
        let path = path.to_string_lossy().to_string();
        {
            let store = SqliteStore::new(&path).await.unwrap();
            seed(&store, 2).await;
            store
                .append_message(NewMessage::user(ConversationId::from("c"), "kept"))
                .await
                .unwrap();
        }
        let store = SqliteStore::new(&path).await.unwrap();
        assert_eq!(store.list_collections().await.unwrap().len(), 1);
        assert_eq!(
            store
                .load_messages(&ConversationId::from("c"))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
