//! Error types for the Tether domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] wraps them all.
//!
//! Errors fall into three classes that callers act on differently:
//! - **fatal** configuration errors (unknown embedding model, dimension or
//!   model mismatch): surfaced immediately, never retried
//! - **retryable** transient errors (connection loss, query timeout, rate
//!   limiting): the caller may retry with backoff, nothing here retries
//! - everything else (not found, invalid input, storage failures)

use thiserror::Error;

/// The top-level error type for all Tether operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_retryable(),
            Error::Embedding(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether this is a configuration-class error that must not be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Store(e) => e.is_fatal(),
            Error::Embedding(e) => e.is_fatal(),
            Error::Config { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Store query '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Embedding dimension mismatch for model '{model}': expected {expected}, got {actual}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("Chunk embedding model '{chunk_model}' does not match collection model '{collection_model}'")]
    ModelMismatch {
        collection_model: String,
        chunk_model: String,
    },

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::DimensionMismatch { .. } | StoreError::ModelMismatch { .. }
        )
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("Embedding provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Embedding API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by embedding provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("Model '{model}' returned {actual} dimensions, configured for {expected}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Network(_) | EmbeddingError::RateLimited { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EmbeddingError::UnknownModel(_)
                | EmbeddingError::NotConfigured(_)
                | EmbeddingError::DimensionMismatch { .. }
        )
    }
}
