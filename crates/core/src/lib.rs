//! # Tether Core
//!
//! Domain types, traits, and error definitions for the Tether retrieval and
//! conversation-memory subsystem. This crate has **no framework
//! dependencies**; it defines the domain model that the storage, provider,
//! and context crates implement against.
//!
//! Every seam is a trait here:
//! - [`ChunkStore`] / [`MessageStore`] for persistence
//! - [`Embedder`] for text-to-vector models
//!
//! so backends can be swapped via configuration and stubbed in tests.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod message;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use chunk::{
    Chunk, ChunkContent, Collection, EmbeddingField, FieldEmbeddings, FileChunk, FileRecord,
    KnnQuery, MAX_QUESTIONS, NewChunk, NewCollection, NewFile, SearchMode, SearchResult, validate_chunk_write,
};
pub use embedding::{Embedder, EmbeddingPurpose};
pub use error::{EmbeddingError, Error, Result, StoreError};
pub use message::{ConversationId, Message, NewMessage, Role};
pub use store::{ChunkStore, MessageStore};
