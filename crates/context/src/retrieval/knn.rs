//! Concurrent per-field nearest-neighbor queries.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tether_core::chunk::{EmbeddingField, KnnQuery, SearchResult};
use tether_core::error::StoreError;
use tether_core::store::ChunkStore;
use tracing::{debug, warn};

/// One knn request: the field to search and the query vector for it.
#[derive(Debug, Clone, Copy)]
pub struct FieldQuery<'a> {
    pub field: EmbeddingField,
    pub vector: &'a [f32],
}

/// Scope shared by every query of one fan-out.
#[derive(Debug, Clone, Copy)]
pub struct FanOutScope {
    pub collection_id: i64,
    pub file_id: Option<i64>,
    /// Candidates fetched per field
    pub depth: usize,
    /// Upper bound for each individual store query
    pub timeout: Duration,
}

/// Run one store call with a deadline, turning an elapsed deadline into
/// [`StoreError::Timeout`].
pub async fn bounded<T, F>(operation: &str, timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation: operation.to_string(),
            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Issue every field query concurrently and wait for all of them.
///
/// Returns one ordered stream per successful query, in the order the
/// queries were given. A failed query is logged and left out so the
/// remaining fields still produce results. The search fails only when a
/// configuration-class error occurs or when every query failed.
pub async fn knn_fan_out(
    store: &dyn ChunkStore,
    scope: FanOutScope,
    queries: &[FieldQuery<'_>],
) -> Result<Vec<Vec<SearchResult>>, StoreError> {
    let calls = queries.iter().map(|q| async move {
        let query = KnnQuery {
            collection_id: scope.collection_id,
            field: q.field,
            vector: q.vector,
            top_k: scope.depth,
            file_id: scope.file_id,
        };
        let operation = format!("knn {}", q.field);
        (q.field, bounded(&operation, scope.timeout, store.knn(query)).await)
    });
    let outcomes = join_all(calls).await;

    let mut streams = Vec::with_capacity(outcomes.len());
    let mut first_error = None;
    for (field, outcome) in outcomes {
        match outcome {
            Ok(hits) => {
                debug!(field = %field, hits = hits.len(), "knn stream ready");
                streams.push(
                    hits.into_iter()
                        .map(|(chunk, distance)| SearchResult::similarity(chunk, distance, field))
                        .collect(),
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    collection_id = scope.collection_id,
                    field = %field,
                    error = %e,
                    "knn query failed, merging remaining fields"
                );
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if streams.is_empty() => Err(e),
        _ => Ok(streams),
    }
}
