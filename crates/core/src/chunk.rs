//! Chunk, collection, and file domain types.
//!
//! A [`Chunk`] is the retrievable unit of content. Besides its primary text
//! it may carry a summary and up to [`MAX_QUESTIONS`] synthetic questions;
//! each non-empty text field has exactly one embedding vector, produced by
//! the chunk's `embedding_model_name` against the text currently stored in
//! that field.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Maximum number of synthetic questions stored per chunk.
pub const MAX_QUESTIONS: usize = 5;

/// One of the seven parallel embedding slots of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingField {
    Primary,
    Summary,
    Question1,
    Question2,
    Question3,
    Question4,
    Question5,
}

impl EmbeddingField {
    /// Every field, in query order.
    pub const ALL: [EmbeddingField; 7] = [
        EmbeddingField::Primary,
        EmbeddingField::Summary,
        EmbeddingField::Question1,
        EmbeddingField::Question2,
        EmbeddingField::Question3,
        EmbeddingField::Question4,
        EmbeddingField::Question5,
    ];

    /// The question field for a zero-based question index.
    pub fn question(index: usize) -> Option<Self> {
        match index {
            0 => Some(EmbeddingField::Question1),
            1 => Some(EmbeddingField::Question2),
            2 => Some(EmbeddingField::Question3),
            3 => Some(EmbeddingField::Question4),
            4 => Some(EmbeddingField::Question5),
            _ => None,
        }
    }

    /// Zero-based question index, if this is a question field.
    pub fn question_index(&self) -> Option<usize> {
        match self {
            EmbeddingField::Question1 => Some(0),
            EmbeddingField::Question2 => Some(1),
            EmbeddingField::Question3 => Some(2),
            EmbeddingField::Question4 => Some(3),
            EmbeddingField::Question5 => Some(4),
            _ => None,
        }
    }

    pub fn is_question(&self) -> bool {
        self.question_index().is_some()
    }

    /// Name of the text column holding this field.
    pub fn text_column(&self) -> &'static str {
        match self {
            EmbeddingField::Primary => "primary_text",
            EmbeddingField::Summary => "summary",
            EmbeddingField::Question1 => "question_1",
            EmbeddingField::Question2 => "question_2",
            EmbeddingField::Question3 => "question_3",
            EmbeddingField::Question4 => "question_4",
            EmbeddingField::Question5 => "question_5",
        }
    }

    /// Name of the vector column holding this field's embedding.
    pub fn embedding_column(&self) -> &'static str {
        match self {
            EmbeddingField::Primary => "embedding_primary",
            EmbeddingField::Summary => "embedding_summary",
            EmbeddingField::Question1 => "embedding_q1",
            EmbeddingField::Question2 => "embedding_q2",
            EmbeddingField::Question3 => "embedding_q3",
            EmbeddingField::Question4 => "embedding_q4",
            EmbeddingField::Question5 => "embedding_q5",
        }
    }
}

impl std::fmt::Display for EmbeddingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text_column())
    }
}

/// A named partition of chunks sharing one embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub embedding_model_name: String,
    /// Vector length every chunk embedding in this collection must have
    pub embedding_dimensions: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCollection {
    pub name: String,
    pub embedding_model_name: String,
    pub embedding_dimensions: usize,
}

/// A source file whose content was split into chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub collection_id: i64,
    pub user_id: Option<i64>,
    pub file_name: String,
    /// SHA-256 of the ingested content, hex encoded
    pub file_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFile {
    pub collection_id: i64,
    pub user_id: Option<i64>,
    pub file_name: String,
    pub file_hash: String,
}

/// The text fields of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkContent {
    pub primary_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<String>,
}

impl ChunkContent {
    pub fn new(primary_text: impl Into<String>) -> Self {
        Self {
            primary_text: primary_text.into(),
            summary: None,
            questions: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_questions<I, S>(mut self, questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.questions = questions.into_iter().map(Into::into).collect();
        self
    }

    /// The stored text for a field, or `None` when the field is empty.
    ///
    /// Whitespace-only text counts as empty: it never gets a vector.
    pub fn text_for(&self, field: EmbeddingField) -> Option<&str> {
        let text = match field {
            EmbeddingField::Primary => Some(self.primary_text.as_str()),
            EmbeddingField::Summary => self.summary.as_deref(),
            other => other
                .question_index()
                .and_then(|i| self.questions.get(i))
                .map(String::as_str),
        };
        text.filter(|t| !t.trim().is_empty())
    }

    /// Fields that carry non-empty text and therefore need a vector.
    pub fn populated_fields(&self) -> Vec<EmbeddingField> {
        EmbeddingField::ALL
            .into_iter()
            .filter(|f| self.text_for(*f).is_some())
            .collect()
    }
}

/// Embedding vectors keyed by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldEmbeddings(BTreeMap<EmbeddingField, Vec<f32>>);

impl FieldEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: EmbeddingField, vector: Vec<f32>) -> Option<Vec<f32>> {
        self.0.insert(field, vector)
    }

    pub fn get(&self, field: EmbeddingField) -> Option<&[f32]> {
        self.0.get(&field).map(Vec::as_slice)
    }

    pub fn remove(&mut self, field: EmbeddingField) -> Option<Vec<f32>> {
        self.0.remove(&field)
    }

    pub fn contains(&self, field: EmbeddingField) -> bool {
        self.0.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = EmbeddingField> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmbeddingField, &[f32])> {
        self.0.iter().map(|(f, v)| (*f, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(EmbeddingField, Vec<f32>)> for FieldEmbeddings {
    fn from_iter<T: IntoIterator<Item = (EmbeddingField, Vec<f32>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A chunk ready to be inserted, embeddings already computed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub collection_id: i64,
    pub file_id: i64,
    pub user_id: Option<i64>,
    pub content: ChunkContent,
    pub embeddings: FieldEmbeddings,
    pub embedding_model_name: String,
    pub metadata: serde_json::Value,
}

/// A chunk written together with its file by
/// [`ChunkStore::write_file`](crate::store::ChunkStore::write_file). The
/// collection and file ids are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChunk {
    pub user_id: Option<i64>,
    pub content: ChunkContent,
    pub embeddings: FieldEmbeddings,
    pub embedding_model_name: String,
    pub metadata: serde_json::Value,
}

impl FileChunk {
    pub fn into_new_chunk(self, collection_id: i64, file_id: i64) -> NewChunk {
        NewChunk {
            collection_id,
            file_id,
            user_id: self.user_id,
            content: self.content,
            embeddings: self.embeddings,
            embedding_model_name: self.embedding_model_name,
            metadata: self.metadata,
        }
    }
}

/// A stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub collection_id: i64,
    pub file_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(flatten)]
    pub content: ChunkContent,
    /// Vectors are stored as blobs and never serialized to callers
    #[serde(skip)]
    pub embeddings: FieldEmbeddings,
    pub embedding_model_name: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Check that a content/vector pair set is consistent with its collection.
///
/// Enforced on every chunk write, by every store:
/// - at most [`MAX_QUESTIONS`] questions
/// - the chunk's model is the collection's model
/// - every non-empty text field has a vector and no empty field has one
/// - every vector has the collection's dimension
pub fn validate_chunk_write(
    collection: &Collection,
    content: &ChunkContent,
    embeddings: &FieldEmbeddings,
    embedding_model_name: &str,
) -> Result<(), StoreError> {
    if content.questions.len() > MAX_QUESTIONS {
        return Err(StoreError::InvalidChunk(format!(
            "{} questions given, at most {MAX_QUESTIONS} are supported",
            content.questions.len()
        )));
    }

    if embedding_model_name != collection.embedding_model_name {
        return Err(StoreError::ModelMismatch {
            collection_model: collection.embedding_model_name.clone(),
            chunk_model: embedding_model_name.to_string(),
        });
    }

    for field in EmbeddingField::ALL {
        let has_text = content.text_for(field).is_some();
        match (has_text, embeddings.get(field)) {
            (true, None) => {
                return Err(StoreError::InvalidChunk(format!(
                    "field '{field}' has text but no embedding"
                )));
            }
            (false, Some(_)) => {
                return Err(StoreError::InvalidChunk(format!(
                    "field '{field}' has an embedding but no text"
                )));
            }
            (true, Some(vector)) if vector.len() != collection.embedding_dimensions => {
                return Err(StoreError::DimensionMismatch {
                    model: collection.embedding_model_name.clone(),
                    expected: collection.embedding_dimensions,
                    actual: vector.len(),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

/// A single nearest-neighbor request against one embedding field.
#[derive(Debug, Clone)]
pub struct KnnQuery<'a> {
    pub collection_id: i64,
    pub field: EmbeddingField,
    pub vector: &'a [f32],
    pub top_k: usize,
    pub file_id: Option<i64>,
}

/// How a search request finds chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Case-insensitive substring match on primary text only
    Keyword,
    /// Multi-field vector similarity (default)
    #[default]
    Similarity,
    /// Similarity results first, then keyword hits not already present
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Similarity => "similarity",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyword" => Ok(SearchMode::Keyword),
            "similarity" | "vector" => Ok(SearchMode::Similarity),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode '{other}'")),
        }
    }
}

/// A chunk paired with the evidence that surfaced it.
///
/// `distance` is `None` for keyword hits, which carry no similarity value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub field: EmbeddingField,
}

impl SearchResult {
    pub fn similarity(chunk: Chunk, distance: f32, field: EmbeddingField) -> Self {
        Self {
            chunk,
            distance: Some(distance),
            field,
        }
    }

    pub fn keyword(chunk: Chunk) -> Self {
        Self {
            chunk,
            distance: None,
            field: EmbeddingField::Primary,
        }
    }
}
