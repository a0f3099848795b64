//! Composition root: builds the store, the embedding registry, and the
//! conversation locks from configuration, once per process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tether_config::AppConfig;
use tether_context::{
    ConversationLocks, HeuristicTokenCounter, Indexer, RetrievalSettings, Retriever,
};
use tether_core::chunk::Collection;
use tether_core::store::ChunkStore;
use tether_memory::{SqliteStore, SqliteStoreOptions};
use tether_providers::EmbeddingRegistry;
use tracing::debug;

pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub embeddings: Arc<EmbeddingRegistry>,
    pub locks: ConversationLocks,
    pub counter: Arc<HeuristicTokenCounter>,
}

/// The config file in effect: `--config` or the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = config_path(explicit);
    let config =
        AppConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}

impl Runtime {
    pub async fn open(explicit: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_config(explicit)?;

        let db_path = config.store.resolved_path();
        if !config.store.is_in_memory()
            && let Some(parent) = Path::new(&db_path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let store = SqliteStore::open(SqliteStoreOptions {
            path: db_path,
            max_connections: config.store.max_connections,
            query_timeout: Duration::from_millis(config.store.query_timeout_ms),
        })
        .await?;
        let embeddings = EmbeddingRegistry::from_config(&config.embedding);
        debug!(
            models = ?embeddings.models(),
            default_model = embeddings.default_model(),
            "Runtime ready"
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            embeddings: Arc::new(embeddings),
            locks: ConversationLocks::new(),
            counter: Arc::new(HeuristicTokenCounter),
        })
    }

    pub fn indexer(&self) -> Indexer {
        Indexer::new(self.store.clone(), self.embeddings.clone())
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(
            self.store.clone(),
            self.embeddings.clone(),
            RetrievalSettings::from_config(&self.config),
        )
    }

    /// Look up a collection by name, failing with a readable message.
    pub async fn collection(&self, name: &str) -> Result<Collection, Box<dyn std::error::Error>> {
        let collection = self
            .store
            .get_collection_by_name(name)
            .await?
            .ok_or_else(|| format!("No collection named '{name}'; create it with `tether collection create {name}`"))?;
        Ok(collection)
    }
}
