//! Hybrid ranking: Reciprocal Rank Fusion of similarity and keyword hits.
//!
//! Each chunk scores `1 / (k + rank + 1)` in every list it appears in and
//! the scores are summed, so a chunk found both ways beats one found by a
//! single path, and the best keyword hit competes with the best vector hit
//! for the same slot. Keyword hits carry no distance, so their rank is
//! their storage order.

use std::collections::HashMap;

use tether_core::chunk::SearchResult;

/// Standard RRF constant.
pub const DEFAULT_RRF_K: u32 = 60;

struct Fused {
    result: SearchResult,
    score: f64,
    best_rank: usize,
}

/// Merge two ranked lists into at most `top_k` results, deduplicated by
/// chunk id.
///
/// A chunk present in both lists keeps its similarity distance and field.
/// Equal scores resolve by best rank in either list, then similarity hits
/// before keyword-only hits, so the output is deterministic.
pub fn reciprocal_rank_fusion(
    similarity: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    k: u32,
    top_k: usize,
) -> Vec<SearchResult> {
    if top_k == 0 {
        return Vec::new();
    }
    let k = f64::from(k);

    let mut fused: Vec<Fused> = Vec::with_capacity(similarity.len() + keyword.len());
    let mut positions: HashMap<i64, usize> = HashMap::new();

    for list in [similarity, keyword] {
        for (rank, result) in list.into_iter().enumerate() {
            let score = 1.0 / (k + rank as f64 + 1.0);
            match positions.get(&result.chunk.id) {
                Some(&at) => {
                    let entry = &mut fused[at];
                    entry.score += score;
                    entry.best_rank = entry.best_rank.min(rank);
                }
                None => {
                    positions.insert(result.chunk.id, fused.len());
                    fused.push(Fused {
                        result,
                        score,
                        best_rank: rank,
                    });
                }
            }
        }
    }

    // Stable: insertion order (similarity first) settles remaining ties.
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
    });
    fused.truncate(top_k);
    fused.into_iter().map(|f| f.result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tether_core::chunk::{Chunk, ChunkContent, EmbeddingField, FieldEmbeddings};

    fn chunk(id: i64) -> Chunk {
        Chunk {
            id,
            collection_id: 1,
            file_id: 1,
            user_id: None,
            content: ChunkContent::new(format!("chunk {id}")),
            embeddings: FieldEmbeddings::new(),
            embedding_model_name: "m".into(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    fn similar(id: i64, distance: f32) -> SearchResult {
        SearchResult::similarity(chunk(id), distance, EmbeddingField::Primary)
    }

    fn keyword(id: i64) -> SearchResult {
        SearchResult::keyword(chunk(id))
    }

    fn ids(results: &[SearchResult]) -> Vec<i64> {
        results.iter().map(|r| r.chunk.id).collect()
    }

    #[test]
    fn keyword_only_hit_takes_a_slot() {
        let similarity = (1..=5).map(|id| similar(id, id as f32 * 0.1)).collect();
        let fused = reciprocal_rank_fusion(similarity, vec![keyword(99)], DEFAULT_RRF_K, 3);
        assert_eq!(ids(&fused), vec![1, 99, 2]);
        assert!(fused[1].distance.is_none());
    }

    #[test]
    fn found_both_ways_ranks_first_and_keeps_distance() {
        let similarity = vec![similar(1, 0.1), similar(2, 0.2), similar(3, 0.3)];
        let fused = reciprocal_rank_fusion(
            similarity,
            vec![keyword(3), keyword(7)],
            DEFAULT_RRF_K,
            10,
        );
        assert_eq!(ids(&fused), vec![3, 1, 2, 7]);
        assert_eq!(fused[0].distance, Some(0.3));
    }

    #[test]
    fn one_sided_inputs_keep_their_order() {
        let only_similarity = vec![similar(4, 0.1), similar(2, 0.5)];
        assert_eq!(
            ids(&reciprocal_rank_fusion(only_similarity, Vec::new(), DEFAULT_RRF_K, 5)),
            vec![4, 2]
        );
        let only_keyword = vec![keyword(9), keyword(3)];
        assert_eq!(
            ids(&reciprocal_rank_fusion(Vec::new(), only_keyword, DEFAULT_RRF_K, 5)),
            vec![9, 3]
        );
    }

    #[test]
    fn zero_top_k_is_empty() {
        assert!(reciprocal_rank_fusion(vec![similar(1, 0.0)], vec![keyword(1)], 60, 0).is_empty());
    }
}
