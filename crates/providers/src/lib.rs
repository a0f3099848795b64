//! Embedding provider implementations for Tether.
//!
//! All providers implement the `tether_core::Embedder` trait. The
//! [`EmbeddingRegistry`] selects and lazily builds the right one for each
//! configured model name.

pub mod hashing;
pub mod local;
pub mod registry;
pub mod remote;

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;
pub use local::PromptStyle;
pub use registry::EmbeddingRegistry;
pub use remote::RemoteEmbedder;
