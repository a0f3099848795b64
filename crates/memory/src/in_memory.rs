//! In-memory store — useful for testing and ephemeral sessions.
//!
//! Applies the same write validation and query ordering as the SQLite
//! backend, so either one can stand behind the retrieval layer.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tether_core::chunk::{
    Chunk, ChunkContent, Collection, FieldEmbeddings, FileChunk, FileRecord, KnnQuery, NewChunk,
    NewCollection, NewFile, validate_chunk_write,
};
use tether_core::error::StoreError;
use tether_core::message::{ConversationId, Message, NewMessage};
use tether_core::store::{ChunkStore, MessageStore};
use tokio::sync::RwLock;

use crate::vector::{l2_distance, rank_by_distance};

#[derive(Default)]
struct State {
    collections: Vec<Collection>,
    files: Vec<FileRecord>,
    chunks: Vec<Chunk>,
    messages: Vec<Message>,
    next_id: i64,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn collection(&self, id: i64) -> Result<&Collection, StoreError> {
        self.collections
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::not_found("collection", id))
    }
}

/// A store that keeps everything in process memory.
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
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
        let mut state = self.state.write().await;
        if state.collections.iter().any(|c| c.name == new.name) {
            return Err(StoreError::Conflict(format!(
                "collection '{}' already exists",
                new.name
            )));
        }
        let collection = Collection {
            id: state.allocate_id(),
            name: new.name,
            embedding_model_name: new.embedding_model_name,
            embedding_dimensions: new.embedding_dimensions,
            created_at: Utc::now(),
        };
        state.collections.push(collection.clone());
        Ok(collection)
    }

    async fn get_collection(&self, id: i64) -> Result<Option<Collection>, StoreError> {
        let state = self.state.read().await;
        Ok(state.collections.iter().find(|c| c.id == id).cloned())
    }

    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let state = self.state.read().await;
        Ok(state.collections.iter().find(|c| c.name == name).cloned())
    }

    async fn list_collections(&self) -> Result<Vec<Collection>, StoreError> {
        Ok(self.state.read().await.collections.clone())
    }

    async fn create_file(&self, new: NewFile) -> Result<FileRecord, StoreError> {
        let mut state = self.state.write().await;
        state.collection(new.collection_id)?;
        if state
            .files
            .iter()
            .any(|f| f.collection_id == new.collection_id && f.file_name == new.file_name)
        {
            return Err(StoreError::Conflict(format!(
                "file '{}' already exists in collection {}",
                new.file_name, new.collection_id
            )));
        }
        let file = FileRecord {
            id: state.allocate_id(),
            collection_id: new.collection_id,
            user_id: new.user_id,
            file_name: new.file_name,
            file_hash: new.file_hash,
            created_at: Utc::now(),
        };
        state.files.push(file.clone());
        Ok(file)
    }

    async fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.files.iter().find(|f| f.id == id).cloned())
    }

    async fn get_file_by_name(
        &self,
        collection_id: i64,
        file_name: &str,
    ) -> Result<Option<FileRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .files
            .iter()
            .find(|f| f.collection_id == collection_id && f.file_name == file_name)
            .cloned())
    }

    async fn list_files(&self, collection_id: i64) -> Result<Vec<FileRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .files
            .iter()
            .filter(|f| f.collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn delete_file(&self, file_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let len_before = state.files.len();
        state.files.retain(|f| f.id != file_id);
        state.chunks.retain(|c| c.file_id != file_id);
        Ok(state.files.len() < len_before)
    }

    async fn write_file(
        &self,
        new: NewFile,
        chunks: Vec<FileChunk>,
    ) -> Result<(FileRecord, Vec<Chunk>), StoreError> {
        let mut state = self.state.write().await;
        let collection = state.collection(new.collection_id)?;
        for chunk in &chunks {
            validate_chunk_write(
                collection,
                &chunk.content,
                &chunk.embeddings,
                &chunk.embedding_model_name,
            )?;
        }

        let replaced = state
            .files
            .iter()
            .find(|f| f.collection_id == new.collection_id && f.file_name == new.file_name)
            .map(|f| f.id);
        if let Some(old_id) = replaced {
            state.files.retain(|f| f.id != old_id);
            state.chunks.retain(|c| c.file_id != old_id);
        }

        let file = FileRecord {
            id: state.allocate_id(),
            collection_id: new.collection_id,
            user_id: new.user_id,
            file_name: new.file_name,
            file_hash: new.file_hash,
            created_at: Utc::now(),
        };
        state.files.push(file.clone());

        let mut stored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let new = chunk.into_new_chunk(file.collection_id, file.id);
            let chunk = Chunk {
                id: state.allocate_id(),
                collection_id: new.collection_id,
                file_id: new.file_id,
                user_id: new.user_id,
                content: new.content,
                embeddings: new.embeddings,
                embedding_model_name: new.embedding_model_name,
                metadata: new.metadata,
                created_at: Utc::now(),
            };
            state.chunks.push(chunk.clone());
            stored.push(chunk);
        }
        Ok((file, stored))
    }

    async fn insert_chunk(&self, new: NewChunk) -> Result<Chunk, StoreError> {
        let mut state = self.state.write().await;
        let collection = state.collection(new.collection_id)?;
        let file = state
            .files
            .iter()
            .find(|f| f.id == new.file_id)
            .ok_or_else(|| StoreError::not_found("file", new.file_id))?;
        if file.collection_id != collection.id {
            return Err(StoreError::InvalidChunk(format!(
                "file {} belongs to collection {}, not {}",
                file.id, file.collection_id, collection.id
            )));
        }
        validate_chunk_write(
            collection,
            &new.content,
            &new.embeddings,
            &new.embedding_model_name,
        )?;

        let chunk = Chunk {
            id: state.allocate_id(),
            collection_id: new.collection_id,
            file_id: new.file_id,
            user_id: new.user_id,
            content: new.content,
            embeddings: new.embeddings,
            embedding_model_name: new.embedding_model_name,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        state.chunks.push(chunk.clone());
        Ok(chunk)
    }

    async fn replace_chunk_content(
        &self,
        chunk_id: i64,
        content: ChunkContent,
        embeddings: FieldEmbeddings,
    ) -> Result<Chunk, StoreError> {
        let mut state = self.state.write().await;
        let position = state
            .chunks
            .iter()
            .position(|c| c.id == chunk_id)
            .ok_or_else(|| StoreError::not_found("chunk", chunk_id))?;
        let existing = &state.chunks[position];
        let collection = state.collection(existing.collection_id)?;
        validate_chunk_write(
            collection,
            &content,
            &embeddings,
            &existing.embedding_model_name,
        )?;

        let chunk = &mut state.chunks[position];
        chunk.content = content;
        chunk.embeddings = embeddings;
        Ok(chunk.clone())
    }

    async fn get_chunk(&self, id: i64) -> Result<Option<Chunk>, StoreError> {
        let state = self.state.read().await;
        Ok(state.chunks.iter().find(|c| c.id == id).cloned())
    }

    async fn list_chunks(
        &self,
        collection_id: i64,
        file_id: Option<i64>,
    ) -> Result<Vec<Chunk>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .filter(|c| c.collection_id == collection_id)
            .filter(|c| file_id.is_none_or(|f| c.file_id == f))
            .cloned()
            .collect())
    }

    async fn knn(&self, query: KnnQuery<'_>) -> Result<Vec<(Chunk, f32)>, StoreError> {
        let state = self.state.read().await;
        let collection = state.collection(query.collection_id)?;
        if query.vector.len() != collection.embedding_dimensions {
            return Err(StoreError::DimensionMismatch {
                model: collection.embedding_model_name.clone(),
                expected: collection.embedding_dimensions,
                actual: query.vector.len(),
            });
        }

        let candidates: Vec<(Chunk, f32)> = state
            .chunks
            .iter()
            .filter(|c| c.collection_id == query.collection_id)
            .filter(|c| query.file_id.is_none_or(|f| c.file_id == f))
            .filter_map(|c| {
                let vector = c.embeddings.get(query.field)?;
                Some((c.clone(), l2_distance(vector, query.vector)))
            })
            .collect();

        Ok(rank_by_distance(candidates, query.top_k))
    }

    async fn keyword_search(
        &self,
        collection_id: i64,
        terms: &[String],
        top_k: usize,
        file_id: Option<i64>,
    ) -> Result<Vec<Chunk>, StoreError> {
        let needles: Vec<String> = terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .filter(|c| c.collection_id == collection_id)
            .filter(|c| file_id.is_none_or(|f| c.file_id == f))
            .filter(|c| {
                let haystack = c.content.primary_text.to_lowercase();
                needles.iter().any(|n| haystack.contains(n.as_str()))
            })
            .take(top_k)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut state = self.state.write().await;
        let message = Message {
            id: state.allocate_id(),
            conversation_id: new.conversation_id,
            role: new.role,
            text: new.text,
            created_at: Utc::now(),
            is_deleted: false,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id && !m.is_deleted)
            .cloned()
            .collect())
    }

    async fn soft_delete_message(&self, message_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && !m.is_deleted)
        {
            Some(message) => {
                message.is_deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::chunk::EmbeddingField;

    async fn seeded() -> (InMemoryStore, Collection, FileRecord) {
        let store = InMemoryStore::new();
        let collection = store
            .create_collection(NewCollection {
                name: "docs".into(),
                embedding_model_name: "m".into(),
                embedding_dimensions: 2,
            })
            .await
            .unwrap();
        let file = store
            .create_file(NewFile {
                collection_id: collection.id,
                user_id: None,
                file_name: "a.txt".into(),
                file_hash: "h".into(),
            })
            .await
            .unwrap();
        (store, collection, file)
    }

    fn chunk(collection: &Collection, file: &FileRecord, text: &str, v: Vec<f32>) -> NewChunk {
        NewChunk {
            collection_id: collection.id,
            file_id: file.id,
            user_id: None,
            content: ChunkContent::new(text),
            embeddings: [(EmbeddingField::Primary, v)].into_iter().collect(),
            embedding_model_name: "m".into(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn knn_and_keyword_match_sqlite_semantics() {
        let (store, collection, file) = seeded().await;
        let far = store
            .insert_chunk(chunk(&collection, &file, "Foo bar", vec![1.0, 0.0]))
            .await
            .unwrap();
        let near = store
            .insert_chunk(chunk(&collection, &file, "other", vec![0.0, 1.0]))
            .await
            .unwrap();

        let hits = store
            .knn(KnnQuery {
                collection_id: collection.id,
                field: EmbeddingField::Primary,
                vector: &[0.0, 1.0],
                top_k: 2,
                file_id: None,
            })
            .await
            .unwrap();
        assert_eq!(hits[0].0.id, near.id);
        assert_eq!(hits[1].0.id, far.id);

        let keyword = store
            .keyword_search(collection.id, &["FOO".into()], 5, None)
            .await
            .unwrap();
        assert_eq!(keyword.len(), 1);
        assert_eq!(keyword[0].id, far.id);
    }

    #[tokio::test]
    async fn write_file_is_all_or_nothing() {
        let (store, collection, old) = seeded().await;
        store
            .insert_chunk(chunk(&collection, &old, "old", vec![1.0, 0.0]))
            .await
            .unwrap();
        let piece = |text: &str, v: Vec<f32>| FileChunk {
            user_id: None,
            content: ChunkContent::new(text),
            embeddings: [(EmbeddingField::Primary, v)].into_iter().collect(),
            embedding_model_name: "m".into(),
            metadata: serde_json::Value::Null,
        };
        let same_name = |hash: &str| NewFile {
            collection_id: collection.id,
            user_id: None,
            file_name: "a.txt".into(),
            file_hash: hash.into(),
        };

        let err = store
            .write_file(same_name("h2"), vec![piece("new", vec![0.0, 1.0]), piece("bad", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
        let listed = store.list_chunks(collection.id, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content.primary_text, "old");
        assert_eq!(store.list_files(collection.id).await.unwrap()[0].file_hash, "h");

        let (file, chunks) = store
            .write_file(same_name("h2"), vec![piece("new", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(store.list_files(collection.id).await.unwrap(), vec![file]);
        let listed = store.list_chunks(collection.id, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content.primary_text, "new");
    }

    #[tokio::test]
    async fn duplicate_file_name_conflicts() {
        let (store, collection, _) = seeded().await;
        let err = store
            .create_file(NewFile {
                collection_id: collection.id,
                user_id: None,
                file_name: "a.txt".into(),
                file_hash: "other".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn file_from_other_collection_rejected() {
        let (store, collection, _) = seeded().await;
        let other = store
            .create_collection(NewCollection {
                name: "other".into(),
                embedding_model_name: "m".into(),
                embedding_dimensions: 2,
            })
            .await
            .unwrap();
        let foreign = store
            .create_file(NewFile {
                collection_id: other.id,
                user_id: None,
                file_name: "b.txt".into(),
                file_hash: "h".into(),
            })
            .await
            .unwrap();
        let err = store
            .insert_chunk(chunk(&collection, &foreign, "x", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidChunk(_)));
    }

    #[tokio::test]
    async fn soft_deleted_messages_are_hidden() {
        let store = InMemoryStore::new();
        let conv = ConversationId::from("c");
        let m = store
            .append_message(NewMessage::user(conv.clone(), "one"))
            .await
            .unwrap();
        store
            .append_message(NewMessage::assistant(conv.clone(), "two"))
            .await
            .unwrap();
        assert!(store.soft_delete_message(m.id).await.unwrap());
        let loaded = store.load_messages(&conv).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "two");
    }
}
