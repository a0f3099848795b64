//! Merge/dedupe/rank over per-field knn result streams.
//!
//! Output is defined as: flatten all streams, drop entries without a
//! distance, stable-sort by ascending distance, keep the first occurrence
//! of each chunk id, truncate to `top_k`. The implementation reaches the
//! same list with a k-way heap merge, holding one head per stream instead
//! of the whole flattened candidate set.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use tether_core::chunk::SearchResult;

/// Head of one stream inside the merge heap.
struct Head {
    distance: f32,
    stream: usize,
    result: SearchResult,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // Reversed: BinaryHeap is a max-heap and the smallest distance must pop
    // first. Equal distances pop in stream order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.stream.cmp(&self.stream))
    }
}

/// Merge ordered result streams into one globally ranked, duplicate-free
/// list of at most `top_k` results.
///
/// A chunk that appears in several streams is reported once, with its
/// smallest distance and the field that produced it.
pub fn merge_ranked(streams: Vec<Vec<SearchResult>>, top_k: usize) -> Vec<SearchResult> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut sources: Vec<std::vec::IntoIter<SearchResult>> = streams
        .into_iter()
        .map(|mut stream| {
            stream.retain(|r| r.distance.is_some());
            stream.sort_by(|a, b| distance_of(a).total_cmp(&distance_of(b)));
            stream.into_iter()
        })
        .collect();

    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (stream, source) in sources.iter_mut().enumerate() {
        if let Some(result) = source.next() {
            heap.push(Head {
                distance: distance_of(&result),
                stream,
                result,
            });
        }
    }

    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(top_k);
    while let Some(Head { stream, result, .. }) = heap.pop() {
        if let Some(next) = sources[stream].next() {
            heap.push(Head {
                distance: distance_of(&next),
                stream,
                result: next,
            });
        }
        if seen.insert(result.chunk.id) {
            merged.push(result);
            if merged.len() == top_k {
                break;
            }
        }
    }
    merged
}

fn distance_of(result: &SearchResult) -> f32 {
    result.distance.unwrap_or(f32::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use tether_core::chunk::{Chunk, ChunkContent, EmbeddingField};

    fn chunk(id: i64) -> Chunk {
        Chunk {
            id,
            collection_id: 1,
            file_id: 1,
            user_id: None,
            content: ChunkContent::new(format!("chunk {id}")),
            embeddings: Default::default(),
            embedding_model_name: "m".into(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    fn hit(id: i64, distance: f32, field: EmbeddingField) -> SearchResult {
        SearchResult::similarity(chunk(id), distance, field)
    }

    fn ids(results: &[SearchResult]) -> Vec<i64> {
        results.iter().map(|r| r.chunk.id).collect()
    }

    #[test]
    fn best_evidence_wins_across_fields() {
        let (x, y, z) = (1, 2, 3);
        let primary = vec![
            hit(x, 0.1, EmbeddingField::Primary),
            hit(y, 0.5, EmbeddingField::Primary),
        ];
        let question = vec![
            hit(y, 0.05, EmbeddingField::Question2),
            hit(z, 0.3, EmbeddingField::Question2),
        ];

        let merged = merge_ranked(vec![primary, question], 2);
        assert_eq!(ids(&merged), vec![y, x]);
        assert_eq!(merged[0].distance, Some(0.05));
        assert_eq!(merged[0].field, EmbeddingField::Question2);
    }

    #[test]
    fn duplicates_keep_first_and_fill_from_later_hits() {
        let a = vec![hit(1, 0.2, EmbeddingField::Primary), hit(2, 0.4, EmbeddingField::Primary)];
        let b = vec![hit(1, 0.3, EmbeddingField::Summary), hit(3, 0.5, EmbeddingField::Summary)];
        let merged = merge_ranked(vec![a, b], 10);
        assert_eq!(ids(&merged), vec![1, 2, 3]);
        assert_eq!(merged[0].field, EmbeddingField::Primary);
    }

    #[test]
    fn keyword_hits_without_distance_are_dropped() {
        let stream = vec![
            SearchResult::keyword(chunk(9)),
            hit(4, 0.7, EmbeddingField::Primary),
        ];
        let merged = merge_ranked(vec![stream], 5);
        assert_eq!(ids(&merged), vec![4]);
    }

    #[test]
    fn equal_distances_resolve_in_stream_order() {
        let a = vec![hit(5, 0.5, EmbeddingField::Primary)];
        let b = vec![hit(2, 0.5, EmbeddingField::Summary)];
        assert_eq!(ids(&merge_ranked(vec![a, b], 2)), vec![5, 2]);
    }

    #[test]
    fn empty_inputs() {
        assert!(merge_ranked(Vec::new(), 3).is_empty());
        assert!(merge_ranked(vec![Vec::new(), Vec::new()], 3).is_empty());
        assert!(merge_ranked(vec![vec![hit(1, 0.1, EmbeddingField::Primary)]], 0).is_empty());
    }

    /// Flatten, stable sort, dedupe, truncate.
    fn reference(streams: &[Vec<SearchResult>], top_k: usize) -> Vec<(i64, f32)> {
        let mut flat: Vec<&SearchResult> = streams
            .iter()
            .flatten()
            .filter(|r| r.distance.is_some())
            .collect();
        flat.sort_by(|a, b| distance_of(a).total_cmp(&distance_of(b)));
        let mut seen = HashSet::new();
        flat.into_iter()
            .filter(|r| seen.insert(r.chunk.id))
            .take(top_k)
            .map(|r| (r.chunk.id, distance_of(r)))
            .collect()
    }

    fn arb_streams() -> impl Strategy<Value = Vec<Vec<SearchResult>>> {
        let entry = (0i64..12, prop::option::weighted(0.9, 0u8..20));
        let stream = prop::collection::vec(entry, 0..10);
        prop::collection::vec(stream, 0..7).prop_map(|streams| {
            streams
                .into_iter()
                .enumerate()
                .map(|(s, entries)| {
                    let field = EmbeddingField::ALL[s];
                    let mut stream: Vec<SearchResult> = entries
                        .into_iter()
                        .map(|(id, d)| SearchResult {
                            chunk: chunk(id),
                            // coarse steps so ties are common
                            distance: d.map(|d| f32::from(d) / 10.0),
                            field,
                        })
                        .collect();
                    stream.sort_by(|a, b| distance_of(a).total_cmp(&distance_of(b)));
                    stream
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn heap_merge_matches_flatten_and_sort(streams in arb_streams(), top_k in 0usize..15) {
            let expected = reference(&streams, top_k);
            let merged = merge_ranked(streams.clone(), top_k);
            let actual: Vec<(i64, f32)> = merged
                .iter()
                .map(|r| (r.chunk.id, distance_of(r)))
                .collect();
            prop_assert_eq!(&actual, &expected);

            prop_assert!(merged.len() <= top_k);
            prop_assert!(merged.windows(2).all(|w| distance_of(&w[0]) <= distance_of(&w[1])));
            let unique: HashSet<i64> = merged.iter().map(|r| r.chunk.id).collect();
            prop_assert_eq!(unique.len(), merged.len());

            // Each kept chunk carries its minimum distance over all streams.
            for result in &merged {
                let best = streams
                    .iter()
                    .flatten()
                    .filter(|r| r.chunk.id == result.chunk.id)
                    .filter_map(|r| r.distance)
                    .fold(f32::INFINITY, f32::min);
                prop_assert_eq!(distance_of(result), best);
            }
        }
    }
}
