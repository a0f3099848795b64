//! Post-merge re-ranking hook.

use tether_core::chunk::SearchResult;

/// Reorders merged results before they are truncated and returned.
///
/// Implementations may reorder or drop results but must not add chunks
/// that were not in the input.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult>;
}

/// Keeps the merge order untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughReranker;

impl Reranker for PassthroughReranker {
    fn rerank(&self, _query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        results
    }
}
