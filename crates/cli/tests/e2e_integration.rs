//! End-to-end tests over a real SQLite file: configuration, ingestion,
//! retrieval, and conversation memory wired the way the binary wires them.

use std::sync::Arc;
use std::time::Duration;

use tether_config::AppConfig;
use tether_context::{
    ConversationLocks, ConversationMemory, HeuristicTokenCounter, Indexer, IngestRequest,
    IngestStatus, RetrievalSettings, Retriever, SearchRequest,
};
use tether_core::SearchMode;
use tether_core::message::{ConversationId, Role};
use tether_core::store::ChunkStore;
use tether_memory::{SqliteStore, SqliteStoreOptions};
use tether_providers::EmbeddingRegistry;

const CONFIG: &str = r#"
[store]
path = "unused"
query_timeout_ms = 2000

[embedding]
default_model = "hash-128"

[[embedding.models]]
name = "hash-128"
dimensions = 128
[embedding.models.provider]
kind = "hashing"
instruction_tuned = false

[retrieval]
default_mode = "hybrid"
top_k = 3

[conversation]
max_history_tokens = 40
"#;

async fn open_store(path: &std::path::Path) -> Arc<SqliteStore> {
    let options = SqliteStoreOptions {
        path: path.to_string_lossy().into_owned(),
        max_connections: 2,
        query_timeout: Duration::from_secs(2),
    };
    Arc::new(SqliteStore::open(options).await.unwrap())
}

#[tokio::test]
async fn e2e_ingest_and_search_survive_reopen() {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    assert_eq!(config.retrieval.default_mode, SearchMode::Hybrid);
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tether.sqlite");
    let embeddings = Arc::new(EmbeddingRegistry::from_config(&config.embedding));

    let collection_id = {
        let store = open_store(&db).await;
        let indexer = Indexer::new(store.clone(), embeddings.clone());
        let collection = indexer.create_collection("handbook", None).await.unwrap();
        assert_eq!(collection.embedding_dimensions, 128);

        let text = "Deploys happen every Tuesday after the release review.\n\n\
                    On-call engineers rotate weekly and hand over on Mondays.\n\n\
                    Expense reports are due by the fifth of each month.";
        let mut request = IngestRequest::new(collection.id, "handbook.txt", text);
        request.max_chunk_tokens = 16;
        let report = indexer.ingest_text(request).await.unwrap();
        assert_eq!(report.status, IngestStatus::Created);
        assert_eq!(report.chunks, 3);
        collection.id
    };

    // A fresh pool sees the same data.
    let store = open_store(&db).await;
    let retriever = Retriever::new(
        store.clone(),
        embeddings.clone(),
        RetrievalSettings::from_config(&config),
    );

    let similar = retriever
        .search(
            &SearchRequest::new(
                "On-call engineers rotate weekly and hand over on Mondays.",
                collection_id,
            )
            .mode(SearchMode::Similarity)
            .top_k(1),
        )
        .await
        .unwrap();
    assert_eq!(similar.len(), 1);
    assert!(similar[0].content.primary_text.starts_with("On-call"));

    let keyword = retriever
        .search(&SearchRequest::new("EXPENSE", collection_id).mode(SearchMode::Keyword))
        .await
        .unwrap();
    assert_eq!(keyword.len(), 1);
    assert!(keyword[0].content.primary_text.starts_with("Expense"));

    // Hybrid is the configured default: both lists fused by rank, no duplicates.
    let hybrid = retriever
        .search_scored(&SearchRequest::new("release review", collection_id))
        .await
        .unwrap();
    assert!(!hybrid.is_empty() && hybrid.len() <= 3);
    let ids: std::collections::HashSet<i64> = hybrid.iter().map(|r| r.chunk.id).collect();
    assert_eq!(ids.len(), hybrid.len());

    // Re-ingesting identical content is a no-op.
    let indexer = Indexer::new(store.clone(), embeddings);
    let text = "Deploys happen every Tuesday after the release review.\n\n\
                On-call engineers rotate weekly and hand over on Mondays.\n\n\
                Expense reports are due by the fifth of each month.";
    let mut again = IngestRequest::new(collection_id, "handbook.txt", text);
    again.max_chunk_tokens = 16;
    let report = indexer.ingest_text(again).await.unwrap();
    assert_eq!(report.status, IngestStatus::Unchanged);
    assert_eq!(store.list_chunks(collection_id, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn e2e_conversation_window_and_soft_delete_persist() {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tether.sqlite");
    let conversation = ConversationId::from("support-42");
    let locks = ConversationLocks::new();

    let forgotten = {
        let store = open_store(&db).await;
        let mut memory = ConversationMemory::load(
            store,
            Arc::new(HeuristicTokenCounter),
            locks.clone(),
            conversation.clone(),
        )
        .await
        .unwrap();
        // 40 bytes of text: 10 tokens + 4 overhead = 14 per message
        for turn in 0..4 {
            let role = if turn % 2 == 0 { Role::User } else { Role::Assistant };
            memory
                .append(role, format!("turn {turn} {}", "x".repeat(33)))
                .await
                .unwrap();
        }
        let forgotten = memory.messages()[1].id;
        assert!(memory.soft_delete(forgotten).await.unwrap());
        forgotten
    };

    let store = open_store(&db).await;
    let memory = ConversationMemory::load(
        store,
        Arc::new(HeuristicTokenCounter),
        locks,
        conversation,
    )
    .await
    .unwrap();
    assert_eq!(memory.len(), 3);
    assert!(memory.messages().iter().all(|m| m.id != forgotten));
    assert_eq!(memory.total_tokens(), 42);

    let view = memory.bounded_view(config.conversation.max_history_tokens);
    let texts: Vec<&str> = view.iter().map(|m| &m.text[..6]).collect();
    assert_eq!(texts, vec!["turn 2", "turn 3"]);
}
