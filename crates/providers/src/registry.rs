//! Embedding registry: the one place embedders are created.
//!
//! Built from the `[embedding]` config section by the composition root and
//! shared by reference. Each catalog entry holds exactly one embedder
//! instance, created on first use behind a single-initialization guard, so
//! concurrent first requests for the same model still build it once.

use std::collections::HashMap;
use std::sync::Arc;

use tether_config::{EmbeddingConfig, EmbeddingModelConfig, EmbeddingProviderConfig};
use tether_core::embedding::{Embedder, EmbeddingPurpose};
use tether_core::error::EmbeddingError;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::hashing::HashingEmbedder;
use crate::remote::RemoteEmbedder;

struct ModelSlot {
    dimensions: usize,
    provider: Option<EmbeddingProviderConfig>,
    instance: OnceCell<Arc<dyn Embedder>>,
}

/// Catalog of embedding models keyed by name.
pub struct EmbeddingRegistry {
    slots: HashMap<String, ModelSlot>,
    default_model: String,
}

impl EmbeddingRegistry {
    /// An empty registry. Models are added with [`register`](Self::register)
    /// or [`insert`](Self::insert).
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            slots: HashMap::new(),
            default_model: default_model.into(),
        }
    }

    /// Build a registry from configuration. No model is loaded yet.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut registry = Self::new(&config.default_model);
        for model in &config.models {
            registry.register(model.clone());
        }
        registry
    }

    /// Add a catalog entry that is built lazily on first use.
    pub fn register(&mut self, model: EmbeddingModelConfig) {
        self.slots.insert(
            model.name,
            ModelSlot {
                dimensions: model.dimensions,
                provider: Some(model.provider),
                instance: OnceCell::new(),
            },
        );
    }

    /// Add an already-built embedder under its own model name.
    pub fn insert(&mut self, embedder: Arc<dyn Embedder>) {
        self.slots.insert(
            embedder.model_name().to_string(),
            ModelSlot {
                dimensions: embedder.dimensions(),
                provider: None,
                instance: OnceCell::new_with(Some(embedder)),
            },
        );
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Configured vector length for a model.
    pub fn dimensions(&self, model_name: &str) -> Result<usize, EmbeddingError> {
        self.slot(model_name).map(|s| s.dimensions)
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.slots.contains_key(model_name)
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The shared embedder for a model, building it on first request.
    pub async fn embedder(&self, model_name: &str) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let slot = self.slot(model_name)?;
        let embedder = slot
            .instance
            .get_or_try_init(|| async { build_embedder(model_name, slot) })
            .await?;
        Ok(Arc::clone(embedder))
    }

    /// Embed `text` for `purpose` with the named model.
    ///
    /// The result length is checked against the catalog dimension.
    pub async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
        model_name: &str,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let embedder = self.embedder(model_name).await?;
        let vector = embedder.embed(text, purpose).await?;
        let expected = self.dimensions(model_name)?;
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                model: model_name.to_string(),
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn slot(&self, model_name: &str) -> Result<&ModelSlot, EmbeddingError> {
        self.slots
            .get(model_name)
            .ok_or_else(|| EmbeddingError::UnknownModel(model_name.to_string()))
    }
}

fn build_embedder(model_name: &str, slot: &ModelSlot) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let provider = slot.provider.as_ref().ok_or_else(|| {
        EmbeddingError::NotConfigured(format!("no provider configured for '{model_name}'"))
    })?;

    info!(model = %model_name, kind = provider.kind(), dims = slot.dimensions, "Initializing embedding model");

    let embedder: Arc<dyn Embedder> = match provider {
        EmbeddingProviderConfig::Local { cache_dir, .. } => {
            let local_model = provider.local_model(model_name).unwrap_or(model_name);
            build_local(model_name, local_model, slot.dimensions, cache_dir.as_deref())?
        }
        EmbeddingProviderConfig::Hashing { instruction_tuned } => Arc::new(HashingEmbedder::new(
            model_name,
            slot.dimensions,
            *instruction_tuned,
        )),
        EmbeddingProviderConfig::OpenaiCompat { base_url, .. } => {
            let api_key = provider.resolve_api_key().unwrap_or_else(|| {
                warn!(model = %model_name, "No API key found for remote embedding model");
                String::new()
            });
            Arc::new(RemoteEmbedder::new(
                model_name,
                slot.dimensions,
                base_url,
                api_key,
            )?)
        }
    };
    Ok(embedder)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn build_local(
    model_name: &str,
    local_model: &str,
    dimensions: usize,
    cache_dir: Option<&str>,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let embedder = crate::local::LocalEmbedder::new(
        model_name,
        local_model,
        dimensions,
        cache_dir.map(std::path::PathBuf::from),
    )?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "local-embeddings-fastembed"))]
fn build_local(
    model_name: &str,
    local_model: &str,
    _dimensions: usize,
    _cache_dir: Option<&str>,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Err(EmbeddingError::NotConfigured(format!(
        "'{model_name}' needs local model '{local_model}', but this build has no local \
         embedding runtime (enable the local-embeddings-fastembed feature)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn local_config() -> EmbeddingConfig {
        EmbeddingConfig {
            default_model: "hash-16".into(),
            models: vec![EmbeddingModelConfig {
                name: "hash-16".into(),
                dimensions: 16,
                provider: EmbeddingProviderConfig::Hashing {
                    instruction_tuned: true,
                },
            }],
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dimensions(&self) -> usize {
            4
        }
        async fn embed(&self, _: &str, _: EmbeddingPurpose) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn unknown_model_is_fatal() {
        let registry = EmbeddingRegistry::from_config(&local_config());
        let err = registry
            .embed("hi", EmbeddingPurpose::Query, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::UnknownModel(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn one_instance_per_model() {
        let registry = Arc::new(EmbeddingRegistry::from_config(&local_config()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.embedder("hash-16").await.unwrap()
            }));
        }
        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap());
        }
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[tokio::test]
    async fn embed_uses_configured_dimension() {
        let registry = EmbeddingRegistry::from_config(&local_config());
        let v = registry
            .embed("hello", EmbeddingPurpose::Document, "hash-16")
            .await
            .unwrap();
        assert_eq!(v.len(), 16);
        assert_eq!(registry.dimensions("hash-16").unwrap(), 16);
        assert_eq!(registry.default_model(), "hash-16");
    }

    #[tokio::test]
    async fn inserted_embedder_output_is_dimension_checked() {
        let mut registry = EmbeddingRegistry::new("short");
        registry.insert(Arc::new(ShortEmbedder));
        let err = registry
            .embed("hello", EmbeddingPurpose::Query, "short")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn local_entry_builds_without_downloading() {
        let config = EmbeddingConfig {
            default_model: "multilingual-e5-small".into(),
            models: vec![EmbeddingModelConfig {
                name: "multilingual-e5-small".into(),
                dimensions: 384,
                provider: EmbeddingProviderConfig::Local {
                    model: None,
                    cache_dir: None,
                },
            }],
        };
        let registry = EmbeddingRegistry::from_config(&config);
        let built = registry.embedder("multilingual-e5-small").await;
        if cfg!(feature = "local-embeddings-fastembed") {
            let embedder = built.unwrap();
            assert_eq!(embedder.model_name(), "multilingual-e5-small");
            assert_eq!(embedder.dimensions(), 384);
        } else {
            assert!(built.err().is_some_and(|e| e.is_fatal()));
        }
    }

    #[test]
    fn models_are_listed_sorted() {
        let mut config = local_config();
        config.models.push(EmbeddingModelConfig {
            name: "aaa".into(),
            dimensions: 3,
            provider: EmbeddingProviderConfig::OpenaiCompat {
                base_url: "http://localhost:11434/v1".into(),
                api_key: None,
                api_key_env: None,
            },
        });
        let registry = EmbeddingRegistry::from_config(&config);
        assert_eq!(registry.models(), vec!["aaa", "hash-16"]);
        assert!(registry.contains("aaa"));
    }
}
