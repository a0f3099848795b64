//! Embed-on-write indexing of chunks.
//!
//! The [`Indexer`] is the only writer that computes vectors. Every text
//! field of a chunk is embedded with the collection's model and a purpose
//! matching what the field holds, so stored vectors always describe the
//! text currently next to them.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tether_core::chunk::{
    Chunk, ChunkContent, Collection, EmbeddingField, FieldEmbeddings, FileChunk, FileRecord,
    NewChunk, NewCollection, NewFile,
};
use tether_core::embedding::EmbeddingPurpose;
use tether_core::error::{EmbeddingError, Error, StoreError};
use tether_core::store::ChunkStore;
use tether_providers::EmbeddingRegistry;
use tracing::{debug, info};

use crate::chunker::split_text;

/// Default chunk size for plain-text ingestion.
pub const DEFAULT_CHUNK_TOKENS: usize = 256;

/// A chunk before its vectors are computed.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub collection_id: i64,
    pub file_id: i64,
    pub user_id: Option<i64>,
    pub content: ChunkContent,
    pub metadata: serde_json::Value,
}

/// A plain-text document to split and index as one file.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub collection_id: i64,
    pub file_name: String,
    pub text: String,
    pub user_id: Option<i64>,
    pub max_chunk_tokens: usize,
}

impl IngestRequest {
    pub fn new(collection_id: i64, file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            collection_id,
            file_name: file_name.into(),
            text: text.into(),
            user_id: None,
            max_chunk_tokens: DEFAULT_CHUNK_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Created,
    /// Same name and same content hash: nothing was written
    Unchanged,
    /// Same name, new content: the old file and its chunks were replaced
    Replaced,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub file: FileRecord,
    pub chunks: usize,
    pub status: IngestStatus,
}

/// Vector purpose for a stored field.
pub fn purpose_for(field: EmbeddingField) -> EmbeddingPurpose {
    match field {
        EmbeddingField::Primary => EmbeddingPurpose::Document,
        EmbeddingField::Summary => EmbeddingPurpose::Summary,
        _ => EmbeddingPurpose::Question,
    }
}

pub struct Indexer {
    store: Arc<dyn ChunkStore>,
    embeddings: Arc<EmbeddingRegistry>,
}

impl Indexer {
    pub fn new(store: Arc<dyn ChunkStore>, embeddings: Arc<EmbeddingRegistry>) -> Self {
        Self { store, embeddings }
    }

    /// Create a collection bound to `model`, or to the default model.
    ///
    /// The vector dimension is taken from the model catalog, so an unknown
    /// model fails here rather than at the first chunk write.
    pub async fn create_collection(&self, name: &str, model: Option<&str>) -> Result<Collection, Error> {
        let model = model.unwrap_or(self.embeddings.default_model()).to_string();
        let dimensions = self.embeddings.dimensions(&model)?;
        let collection = self
            .store
            .create_collection(NewCollection {
                name: name.to_string(),
                embedding_model_name: model,
                embedding_dimensions: dimensions,
            })
            .await?;
        info!(
            collection = %collection.name,
            model = %collection.embedding_model_name,
            dims = collection.embedding_dimensions,
            "Created collection"
        );
        Ok(collection)
    }

    /// Embed every non-empty field of the draft and store it.
    pub async fn add_chunk(&self, draft: ChunkDraft) -> Result<Chunk, Error> {
        let collection = self.collection(draft.collection_id).await?;
        let model = collection.embedding_model_name;
        let embeddings = self.embed_fields(&model, &draft.content, None).await?;

        let chunk = self
            .store
            .insert_chunk(NewChunk {
                collection_id: draft.collection_id,
                file_id: draft.file_id,
                user_id: draft.user_id,
                content: draft.content,
                embeddings,
                embedding_model_name: model,
                metadata: draft.metadata,
            })
            .await?;
        Ok(chunk)
    }

    /// Replace a chunk's text fields.
    ///
    /// Fields whose text is unchanged keep their vector. Changed or new
    /// fields are re-embedded and cleared fields lose theirs. Content and
    /// vectors are written together in one store call.
    pub async fn update_content(&self, chunk_id: i64, content: ChunkContent) -> Result<Chunk, Error> {
        let current = self
            .store
            .get_chunk(chunk_id)
            .await?
            .ok_or_else(|| StoreError::not_found("chunk", chunk_id))?;

        let embeddings = self
            .embed_fields(
                &current.embedding_model_name,
                &content,
                Some((&current.content, &current.embeddings)),
            )
            .await?;

        let updated = self
            .store
            .replace_chunk_content(chunk_id, content, embeddings)
            .await?;
        Ok(updated)
    }

    /// Split a document into chunks and index it as one file.
    ///
    /// Re-ingesting a file name with identical content is a no-op. New
    /// content under an existing name replaces the old file and chunks.
    /// Every piece is embedded before anything is written, and the file
    /// and its chunks land in one store call, so a failure leaves the
    /// previous version (or nothing) in place and a retry starts over.
    pub async fn ingest_text(&self, request: IngestRequest) -> Result<IngestReport, Error> {
        let collection = self.collection(request.collection_id).await?;
        let file_hash = content_hash(&request.text);

        let mut status = IngestStatus::Created;
        if let Some(existing) = self
            .store
            .get_file_by_name(collection.id, &request.file_name)
            .await?
        {
            if existing.file_hash == file_hash {
                let chunks = self
                    .store
                    .list_chunks(collection.id, Some(existing.id))
                    .await?
                    .len();
                debug!(file = %existing.file_name, "File unchanged, skipping");
                return Ok(IngestReport {
                    file: existing,
                    chunks,
                    status: IngestStatus::Unchanged,
                });
            }
            status = IngestStatus::Replaced;
        }

        let model = collection.embedding_model_name.as_str();
        let pieces = split_text(&request.text, request.max_chunk_tokens);
        let mut chunks = Vec::with_capacity(pieces.len());
        for (index, piece) in pieces.into_iter().enumerate() {
            let content = ChunkContent::new(piece);
            let embeddings = self.embed_fields(model, &content, None).await?;
            chunks.push(FileChunk {
                user_id: request.user_id,
                content,
                embeddings,
                embedding_model_name: model.to_string(),
                metadata: serde_json::json!({ "chunk_index": index }),
            });
        }

        let (file, stored) = self
            .store
            .write_file(
                NewFile {
                    collection_id: collection.id,
                    user_id: request.user_id,
                    file_name: request.file_name,
                    file_hash,
                },
                chunks,
            )
            .await?;

        info!(
            collection = %collection.name,
            file = %file.file_name,
            chunks = stored.len(),
            ?status,
            "Ingested file"
        );
        Ok(IngestReport {
            file,
            chunks: stored.len(),
            status,
        })
    }

    async fn collection(&self, id: i64) -> Result<Collection, StoreError> {
        self.store
            .get_collection(id)
            .await?
            .ok_or_else(|| StoreError::not_found("collection", id))
    }

    /// Vectors for every populated field of `content`.
    ///
    /// With `previous`, a field whose text equals the previous text reuses
    /// the previous vector.
    async fn embed_fields(
        &self,
        model: &str,
        content: &ChunkContent,
        previous: Option<(&ChunkContent, &FieldEmbeddings)>,
    ) -> Result<FieldEmbeddings, EmbeddingError> {
        let mut embeddings = FieldEmbeddings::new();
        let mut pending = Vec::new();

        for field in content.populated_fields() {
            let Some(text) = content.text_for(field) else {
                continue;
            };
            let reusable = previous.and_then(|(old_content, old_vectors)| {
                (old_content.text_for(field) == Some(text))
                    .then(|| old_vectors.get(field))
                    .flatten()
            });
            match reusable {
                Some(vector) => {
                    embeddings.insert(field, vector.to_vec());
                }
                None => pending.push((field, text)),
            }
        }

        let reused = embeddings.len();
        let computed = try_join_all(pending.into_iter().map(|(field, text)| async move {
            let vector = self.embeddings.embed(text, purpose_for(field), model).await?;
            Ok::<_, EmbeddingError>((field, vector))
        }))
        .await?;

        debug!(model, reused, computed = computed.len(), "Embedded chunk fields");
        for (field, vector) in computed {
            embeddings.insert(field, vector);
        }
        Ok(embeddings)
    }
}

/// SHA-256 of a document's text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
