//! Storage traits for chunks, collections, files, and conversation messages.
//!
//! The retrieval and conversation layers only ever talk to these traits.
//! Implementations live in `tether-memory` (SQLite for durable use, an
//! in-memory store for tests and ephemeral sessions).
//!
//! Every method is a single bounded request: implementations must surface a
//! [`StoreError::Timeout`] or [`StoreError::Transient`] instead of blocking
//! indefinitely. Nothing at this layer retries.

use async_trait::async_trait;

use crate::chunk::{
    Chunk, ChunkContent, Collection, FieldEmbeddings, FileChunk, FileRecord, KnnQuery, NewChunk,
    NewCollection, NewFile,
};
use crate::error::StoreError;
use crate::message::{ConversationId, Message, NewMessage};

/// Persistent records of collections, files, and chunks with their
/// parallel embedding fields.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Create a collection. Names are unique.
    async fn create_collection(&self, new: NewCollection) -> Result<Collection, StoreError>;

    async fn get_collection(&self, id: i64) -> Result<Option<Collection>, StoreError>;

    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError>;

    async fn list_collections(&self) -> Result<Vec<Collection>, StoreError>;

    /// Register a file in an existing collection. File names are unique per
    /// collection.
    async fn create_file(&self, new: NewFile) -> Result<FileRecord, StoreError>;

    async fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError>;

    async fn get_file_by_name(
        &self,
        collection_id: i64,
        file_name: &str,
    ) -> Result<Option<FileRecord>, StoreError>;

    async fn list_files(&self, collection_id: i64) -> Result<Vec<FileRecord>, StoreError>;

    /// Remove a file and every chunk belonging to it. Returns `false` if the
    /// file did not exist.
    async fn delete_file(&self, file_id: i64) -> Result<bool, StoreError>;

    /// Store a file and all of its chunks as one unit, replacing any file
    /// of the same name in the collection along with its chunks.
    ///
    /// Every chunk is validated before anything is written. On error the
    /// store is left exactly as it was: no new file, no partial chunk set,
    /// and the replaced file (if any) still in place.
    async fn write_file(
        &self,
        new: NewFile,
        chunks: Vec<FileChunk>,
    ) -> Result<(FileRecord, Vec<Chunk>), StoreError>;

    /// Insert a chunk with its precomputed embeddings.
    ///
    /// Rejected unless the write passes
    /// [`validate_chunk_write`](crate::chunk::validate_chunk_write) against
    /// the owning collection and the file belongs to that collection.
    async fn insert_chunk(&self, new: NewChunk) -> Result<Chunk, StoreError>;

    /// Replace every text field and every vector of a chunk in one write.
    ///
    /// The full content and vector set are given together so that no stale
    /// (text, vector) pair can survive the update.
    async fn replace_chunk_content(
        &self,
        chunk_id: i64,
        content: ChunkContent,
        embeddings: FieldEmbeddings,
    ) -> Result<Chunk, StoreError>;

    async fn get_chunk(&self, id: i64) -> Result<Option<Chunk>, StoreError>;

    /// Chunks of a collection in storage order, optionally limited to a file.
    async fn list_chunks(
        &self,
        collection_id: i64,
        file_id: Option<i64>,
    ) -> Result<Vec<Chunk>, StoreError>;

    /// Nearest neighbors of `query.vector` in one embedding field.
    ///
    /// Results are ordered by ascending L2 distance with ties broken by the
    /// lowest chunk id. Chunks without a vector in the field are skipped.
    async fn knn(&self, query: KnnQuery<'_>) -> Result<Vec<(Chunk, f32)>, StoreError>;

    /// Case-insensitive substring match of any term against `primary_text`,
    /// in storage order, truncated to `top_k`.
    async fn keyword_search(
        &self,
        collection_id: i64,
        terms: &[String],
        top_k: usize,
        file_id: Option<i64>,
    ) -> Result<Vec<Chunk>, StoreError>;
}

/// Append-only conversation log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and timestamp.
    async fn append_message(&self, new: NewMessage) -> Result<Message, StoreError>;

    /// Non-deleted messages of a conversation, oldest first.
    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError>;

    /// Set the soft-delete flag. Returns `false` if no live message matched.
    async fn soft_delete_message(&self, message_id: i64) -> Result<bool, StoreError>;
}
