//! Storage backends for Tether.
//!
//! Both backends implement `ChunkStore` and `MessageStore` from
//! `tether-core`: SQLite for durable use, in-memory for tests and
//! ephemeral sessions.

pub mod in_memory;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use vector::{blob_to_vector, l2_distance, rank_by_distance, vector_to_blob};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteStoreOptions};
