//! Token-bounded context assembly for Tether.
//!
//! Two halves feed a model call:
//! - [`conversation`]: recent history, windowed to a token ceiling at read
//!   time
//! - [`retrieval`]: document chunks found by keyword, multi-field vector
//!   similarity, or both, merged and ranked down to `top_k`
//!
//! [`indexer`] and [`chunker`] are the write side: they split documents
//! and compute the per-field vectors that retrieval searches.

pub mod chunker;
pub mod conversation;
pub mod indexer;
pub mod retrieval;
pub mod token;

pub use conversation::{ConversationLocks, ConversationMemory};
pub use indexer::{ChunkDraft, IngestReport, IngestRequest, IngestStatus, Indexer};
pub use retrieval::{
    PassthroughReranker, Reranker, RetrievalSettings, Retriever, SearchRequest, merge_ranked,
    reciprocal_rank_fusion,
};
pub use token::{HeuristicTokenCounter, TokenCounter, estimate_tokens, message_tokens};
