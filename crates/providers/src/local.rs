//! In-process ONNX embedding models.
//!
//! Weights are downloaded from Hugging Face on first use and cached; after
//! that inference runs entirely offline. Each supported model family expects
//! its own input prefix, so the [`PromptStyle`] for the model turns an
//! [`EmbeddingPurpose`] into the query or passage marker it was trained on.
//!
//! The ONNX runtime is pulled in by the `local-embeddings-fastembed` feature
//! (on by default). Without it, a `local` catalog entry fails at first use
//! with a configuration error.

use tether_core::embedding::EmbeddingPurpose;

/// Input convention of a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// No prefix (MiniLM)
    Plain,
    /// Instruction on queries only
    Bge,
    /// `query: ` / `passage: `
    E5,
    /// `search_query: ` / `search_document: `
    Nomic,
}

const BGE_QUERY_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

impl PromptStyle {
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("multilingual-e5") {
            PromptStyle::E5
        } else if model.starts_with("nomic-embed") {
            PromptStyle::Nomic
        } else if model.starts_with("bge-") {
            PromptStyle::Bge
        } else {
            PromptStyle::Plain
        }
    }

    /// Text placed before the input for `purpose`.
    ///
    /// Stored questions are compared against question-seeking queries, so
    /// both sides of that match use the query marker.
    pub fn prefix(self, purpose: EmbeddingPurpose) -> &'static str {
        let query_side = matches!(
            purpose,
            EmbeddingPurpose::Query
                | EmbeddingPurpose::QueryForQuestions
                | EmbeddingPurpose::Question
        );
        match self {
            PromptStyle::Plain => "",
            PromptStyle::Bge => match purpose {
                EmbeddingPurpose::Query => BGE_QUERY_INSTRUCTION,
                _ => "",
            },
            PromptStyle::E5 if query_side => "query: ",
            PromptStyle::E5 => "passage: ",
            PromptStyle::Nomic if query_side => "search_query: ",
            PromptStyle::Nomic => "search_document: ",
        }
    }

    pub fn apply(self, text: &str, purpose: EmbeddingPurpose) -> String {
        format!("{}{text}", self.prefix(purpose))
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
pub use engine::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod engine {
    use std::path::PathBuf;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tether_core::embedding::{Embedder, EmbeddingPurpose};
    use tether_core::error::EmbeddingError;
    use tokio::sync::Mutex;
    use tracing::{debug, info};

    use super::PromptStyle;

    /// A fastembed model, loaded on first use and shared behind a mutex.
    pub struct LocalEmbedder {
        model_name: String,
        local_model: String,
        kind: fastembed::EmbeddingModel,
        dimensions: usize,
        cache_dir: Option<PathBuf>,
        style: PromptStyle,
        engine: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        /// Resolve the model name. Nothing is downloaded until the first
        /// [`embed`](Embedder::embed).
        pub fn new(
            model_name: impl Into<String>,
            local_model: &str,
            dimensions: usize,
            cache_dir: Option<PathBuf>,
        ) -> Result<Self, EmbeddingError> {
            Ok(Self {
                model_name: model_name.into(),
                local_model: local_model.to_string(),
                kind: fastembed_model(local_model)?,
                dimensions,
                cache_dir,
                style: PromptStyle::for_model(local_model),
                engine: Arc::new(Mutex::new(None)),
            })
        }

        pub fn prompt_style(&self) -> PromptStyle {
            self.style
        }
    }

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        use fastembed::EmbeddingModel as M;
        match name {
            "all-minilm-l6-v2" => Ok(M::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(M::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(M::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(M::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(M::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(M::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(M::MultilingualE5Small),
            "multilingual-e5-base" => Ok(M::MultilingualE5Base),
            "multilingual-e5-large" => Ok(M::MultilingualE5Large),
            other => Err(EmbeddingError::NotConfigured(format!(
                "unknown local embedding model '{other}'"
            ))),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(
            &self,
            text: &str,
            purpose: EmbeddingPurpose,
        ) -> Result<Vec<f32>, EmbeddingError> {
            let input = self.style.apply(text, purpose);
            let mut guard = Arc::clone(&self.engine).lock_owned().await;
            let kind = self.kind.clone();
            let cache_dir = self.cache_dir.clone();
            let local_model = self.local_model.clone();

            // ONNX inference is CPU-bound; the guard travels with the work.
            let mut vectors = tokio::task::spawn_blocking(move || {
                if guard.is_none() {
                    info!(model = %local_model, "Loading local embedding model");
                    let mut options =
                        fastembed::InitOptions::new(kind).with_show_download_progress(false);
                    if let Some(dir) = cache_dir {
                        options = options.with_cache_dir(dir);
                    }
                    let engine = fastembed::TextEmbedding::try_new(options).map_err(|e| {
                        EmbeddingError::NotConfigured(format!(
                            "failed to load local model '{local_model}': {e}"
                        ))
                    })?;
                    *guard = Some(engine);
                }
                let engine = guard.as_mut().ok_or_else(|| {
                    EmbeddingError::NotConfigured(format!("local model '{local_model}' is not loaded"))
                })?;
                engine
                    .embed(vec![input], None)
                    .map_err(|e| EmbeddingError::InvalidResponse(format!("local inference failed: {e}")))
            })
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(format!("embedding task failed: {e}")))??;

            debug!(model = %self.model_name, "Local embedding computed");
            vectors
                .pop()
                .ok_or_else(|| EmbeddingError::InvalidResponse("local model returned no vector".into()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn every_catalog_model_maps_to_a_fastembed_model() {
            for (name, _) in tether_config::LOCAL_MODELS {
                assert!(fastembed_model(name).is_ok(), "{name}");
            }
        }

        #[test]
        fn unknown_model_fails_before_download() {
            let err = LocalEmbedder::new("m", "word2vec", 300, None).err().unwrap();
            assert!(matches!(err, EmbeddingError::NotConfigured(_)));
        }

        #[test]
        fn construction_picks_prompt_style() {
            let embedder = LocalEmbedder::new("default", "multilingual-e5-small", 384, None).unwrap();
            assert_eq!(embedder.prompt_style(), PromptStyle::E5);
            assert_eq!(embedder.dimensions(), 384);
            assert_eq!(embedder.model_name(), "default");
        }
    }
}
