//! Vector distance and storage utilities.
//!
//! Pure-Rust implementations of:
//! - L2 (Euclidean) distance, the metric every knn query ranks by
//! - little-endian `f32` blob encoding for vector columns
//! - the shared knn ordering (ascending distance, lowest id on ties)

use std::cmp::Ordering;

use tether_core::chunk::Chunk;
use tether_core::error::StoreError;

/// Euclidean distance between two vectors of equal length.
///
/// Accumulates in `f64` to keep ties stable for nearly-identical vectors.
/// Callers check dimensions first; mismatched lengths compare the shared
/// prefix only.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    sum.sqrt() as f32
}

/// Serialize an embedding vector to bytes.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding vector from bytes.
pub fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::QueryFailed(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Order knn candidates by ascending distance, ties by lowest chunk id,
/// and keep the first `top_k`.
pub fn rank_by_distance(mut candidates: Vec<(Chunk, f32)>, top_k: usize) -> Vec<(Chunk, f32)> {
    candidates.sort_by(|(a, da), (b, db)| {
        da.partial_cmp(db)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(top_k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tether_core::chunk::ChunkContent;

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

    #[test]
    fn l2_identical_vectors() {
        assert_eq!(l2_distance(&[0.0, 0.0, 1.0], &[0.0, 0.0, 1.0]), 0.0);
    }

    #[test]
    fn l2_known_value() {
        // 3-4-5 triangle
        let d = l2_distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn l2_scaled_vector() {
        let d = l2_distance(&[0.0, 0.0, 1.0], &[0.0, 0.0, 0.9]);
        assert!((d - 0.1).abs() < 1e-6);
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![0.25, -1.5, 3.0];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)).unwrap(), v);
    }

    #[test]
    fn truncated_blob_is_an_error() {
        assert!(blob_to_vector(&[0, 0, 128]).is_err());
    }

    #[test]
    fn ranking_breaks_ties_by_lowest_id() {
        let ranked = rank_by_distance(
            vec![(chunk(9), 0.5), (chunk(3), 0.5), (chunk(5), 0.1)],
            10,
        );
        let ids: Vec<i64> = ranked.iter().map(|(c, _)| c.id).collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn ranking_respects_top_k() {
        let ranked = rank_by_distance(vec![(chunk(1), 0.3), (chunk(2), 0.2)], 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.id, 2);
    }
}
