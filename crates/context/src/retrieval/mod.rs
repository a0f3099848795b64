//! Retrieval facade: keyword, similarity, and hybrid search over a
//! collection.
//!
//! # Similarity pipeline
//!
//! 1. Embed the query once per purpose needed: documents and summaries are
//!    matched with a retrieval-query vector, stored questions with a
//!    question-matching vector.
//! 2. Fan out one knn per field (primary, summary, and the five question
//!    slots unless disabled), each fetching `top_k * candidate_multiplier`
//!    candidates.
//! 3. Merge the streams by best distance, dedupe by chunk id, truncate.
//! 4. Hand the list to the [`Reranker`].
//!
//! Hybrid mode over-fetches both the similarity list and the keyword list to
//! `top_k * candidate_multiplier` and fuses them by reciprocal rank, so
//! keyword-only matches compete with vector matches for the `top_k` slots.
//!
//! Every call re-queries the store. Nothing is cached between searches.

pub mod fusion;
pub mod knn;
pub mod merge;
pub mod rerank;

use std::sync::Arc;
use std::time::Duration;

use tether_config::AppConfig;
use tether_core::chunk::{Chunk, Collection, EmbeddingField, SearchMode, SearchResult};
use tether_core::embedding::EmbeddingPurpose;
use tether_core::error::{Error, StoreError};
use tether_core::store::ChunkStore;
use tether_providers::EmbeddingRegistry;
use tracing::debug;

pub use fusion::{DEFAULT_RRF_K, reciprocal_rank_fusion};
pub use knn::{FanOutScope, FieldQuery, bounded, knn_fan_out};
pub use merge::merge_ranked;
pub use rerank::{PassthroughReranker, Reranker};

/// Defaults applied to requests that leave a knob unset.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub default_mode: SearchMode,
    pub top_k: usize,
    pub candidate_multiplier: usize,
    pub include_questions: bool,
    /// Rank constant for hybrid fusion
    pub rrf_k: u32,
    /// Deadline for each individual store query
    pub query_timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RetrievalSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_mode: config.retrieval.default_mode,
            top_k: config.retrieval.top_k,
            candidate_multiplier: config.retrieval.candidate_multiplier.max(1),
            include_questions: config.retrieval.include_questions,
            rrf_k: config.retrieval.rrf_k,
            query_timeout: Duration::from_millis(config.store.query_timeout_ms),
        }
    }
}

/// A single search call. Unset knobs fall back to [`RetrievalSettings`].
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub collection_id: i64,
    pub mode: Option<SearchMode>,
    pub top_k: Option<usize>,
    pub file_id: Option<i64>,
    pub include_questions: Option<bool>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, collection_id: i64) -> Self {
        Self {
            query: query.into(),
            collection_id,
            mode: None,
            top_k: None,
            file_id: None,
            include_questions: None,
        }
    }

    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Restrict results to chunks of one file.
    pub fn file(mut self, file_id: i64) -> Self {
        self.file_id = Some(file_id);
        self
    }

    pub fn include_questions(mut self, include: bool) -> Self {
        self.include_questions = Some(include);
        self
    }
}

/// The public search entry point.
pub struct Retriever {
    store: Arc<dyn ChunkStore>,
    embeddings: Arc<EmbeddingRegistry>,
    reranker: Arc<dyn Reranker>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embeddings: Arc<EmbeddingRegistry>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embeddings,
            reranker: Arc::new(PassthroughReranker),
            settings,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Matching chunks, best first.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<Chunk>, Error> {
        Ok(self
            .search_scored(request)
            .await?
            .into_iter()
            .map(|r| r.chunk)
            .collect())
    }

    /// Matching chunks with the distance and field that surfaced them.
    ///
    /// A blank query or a collection that does not exist yields no results.
    pub async fn search_scored(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, Error> {
        let query = request.query.trim();
        let top_k = request.top_k.unwrap_or(self.settings.top_k);
        let mode = request.mode.unwrap_or(self.settings.default_mode);
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let lookup = bounded(
            "get collection",
            self.settings.query_timeout,
            self.store.get_collection(request.collection_id),
        );
        let Some(collection) = lookup.await? else {
            debug!(collection_id = request.collection_id, "Search on missing collection");
            return Ok(Vec::new());
        };

        let results = match mode {
            SearchMode::Keyword => self.keyword_results(query, request, top_k).await?,
            SearchMode::Similarity => self.similarity_results(&collection, query, request, top_k).await?,
            SearchMode::Hybrid => {
                let candidates = self.candidate_depth(top_k);
                let similarity = self
                    .similarity_results(&collection, query, request, candidates)
                    .await?;
                let keyword = self.keyword_results(query, request, candidates).await?;
                debug!(
                    similarity = similarity.len(),
                    keyword = keyword.len(),
                    "Fusing hybrid candidates"
                );
                reciprocal_rank_fusion(similarity, keyword, self.settings.rrf_k, top_k)
            }
        };

        let mut results = self.reranker.rerank(query, results);
        results.truncate(top_k);

        debug!(
            collection_id = collection.id,
            mode = %mode,
            results = results.len(),
            "Search complete"
        );
        Ok(results)
    }

    /// Case-insensitive substring match of any term against primary text,
    /// in storage order.
    pub async fn keyword_search(
        &self,
        collection_id: i64,
        terms: &[String],
        top_k: usize,
        file_id: Option<i64>,
    ) -> Result<Vec<Chunk>, StoreError> {
        bounded(
            "keyword search",
            self.settings.query_timeout,
            self.store.keyword_search(collection_id, terms, top_k, file_id),
        )
        .await
    }

    async fn keyword_results(
        &self,
        query: &str,
        request: &SearchRequest,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        // The whole query is one substring term.
        let terms = [query.to_string()];
        let chunks = self
            .keyword_search(request.collection_id, &terms, top_k, request.file_id)
            .await?;
        Ok(chunks.into_iter().map(SearchResult::keyword).collect())
    }

    fn candidate_depth(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.settings.candidate_multiplier)
    }

    /// Up to `limit` merged vector hits, best distance first.
    async fn similarity_results(
        &self,
        collection: &Collection,
        query: &str,
        request: &SearchRequest,
        limit: usize,
    ) -> Result<Vec<SearchResult>, Error> {
        let model = collection.embedding_model_name.as_str();
        let include_questions = request
            .include_questions
            .unwrap_or(self.settings.include_questions);

        let document_vector = self
            .embeddings
            .embed(query, EmbeddingPurpose::Query, model)
            .await?;
        let question_vector = if include_questions {
            Some(
                self.embeddings
                    .embed(query, EmbeddingPurpose::QueryForQuestions, model)
                    .await?,
            )
        } else {
            None
        };

        let queries: Vec<FieldQuery<'_>> = EmbeddingField::ALL
            .into_iter()
            .filter_map(|field| {
                let vector = if field.is_question() {
                    question_vector.as_deref()?
                } else {
                    document_vector.as_slice()
                };
                Some(FieldQuery { field, vector })
            })
            .collect();

        let scope = FanOutScope {
            collection_id: collection.id,
            file_id: request.file_id,
            depth: self.candidate_depth(limit),
            timeout: self.settings.query_timeout,
        };
        let streams = knn_fan_out(self.store.as_ref(), scope, &queries).await?;
        Ok(merge_ranked(streams, limit))
    }
}
