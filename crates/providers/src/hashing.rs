//! Offline feature-hashing embedder.
//!
//! Lower-cased word unigrams and bigrams are hashed (SHA-256, salted by the
//! model name) into a fixed number of signed buckets, then the vector is
//! L2-normalized. Similar vectors mean shared words, nothing more, so this
//! is a stand-in for tests and machines that cannot fetch model weights.
//! An instruction-tuned variant also mixes in the tokens of the purpose
//! instruction, so the same text embedded for different purposes yields
//! different vectors.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tether_core::embedding::{Embedder, EmbeddingPurpose};
use tether_core::error::EmbeddingError;

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;
const INSTRUCTION_WEIGHT: f32 = 0.35;

/// A deterministic, dependency-free embedder.
pub struct HashingEmbedder {
    model_name: String,
    dimensions: usize,
    instruction_tuned: bool,
    salt: [u8; 32],
}

impl HashingEmbedder {
    pub fn new(model_name: impl Into<String>, dimensions: usize, instruction_tuned: bool) -> Self {
        let model_name = model_name.into();
        let salt: [u8; 32] = Sha256::digest(model_name.as_bytes()).into();
        Self {
            model_name,
            dimensions,
            instruction_tuned,
            salt,
        }
    }

    pub fn is_instruction_tuned(&self) -> bool {
        self.instruction_tuned
    }

    fn encode(&self, text: &str, purpose: EmbeddingPurpose) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let words = tokenize(text);

        for word in &words {
            self.accumulate(&mut vector, "u", word, UNIGRAM_WEIGHT);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, "b", &bigram, BIGRAM_WEIGHT);
        }
        if self.instruction_tuned {
            // Instruction features live in their own namespace so they never
            // collide with a document word of the same spelling.
            let purpose_tag = format!("{purpose:?}");
            self.accumulate(&mut vector, "p", &purpose_tag, INSTRUCTION_WEIGHT);
            for word in tokenize(purpose.instruction()) {
                self.accumulate(&mut vector, "i", &word, INSTRUCTION_WEIGHT);
            }
        }

        normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], kind: &str, feature: &str, weight: f32) {
        if vector.is_empty() {
            return;
        }
        let mut hasher = Sha256::new();
        hasher.update(self.salt);
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(index_bytes) % vector.len() as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
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
        Ok(self.encode(text, purpose))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }

    #[tokio::test]
    async fn vectors_have_configured_dimension_and_unit_norm() {
        let embedder = HashingEmbedder::new("hash-64", 64, true);
        let v = embedder
            .embed("Rust ownership and borrowing", EmbeddingPurpose::Document)
            .await
            .unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn same_input_is_deterministic() {
        let embedder = HashingEmbedder::new("hash-64", 64, true);
        let a = embedder.embed("hello world", EmbeddingPurpose::Query).await.unwrap();
        let b = embedder.embed("hello world", EmbeddingPurpose::Query).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn purpose_changes_vector_only_when_instruction_tuned() {
        let tuned = HashingEmbedder::new("hash-64", 64, true);
        let a = tuned.embed("hello world", EmbeddingPurpose::Query).await.unwrap();
        let b = tuned
            .embed("hello world", EmbeddingPurpose::QueryForQuestions)
            .await
            .unwrap();
        assert_ne!(a, b);

        let plain = HashingEmbedder::new("hash-64", 64, false);
        let a = plain.embed("hello world", EmbeddingPurpose::Query).await.unwrap();
        let b = plain.embed("hello world", EmbeddingPurpose::Document).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn related_text_is_closer_than_unrelated() {
        let embedder = HashingEmbedder::new("hash-256", 256, false);
        let query = embedder
            .embed("sqlite vector search", EmbeddingPurpose::Query)
            .await
            .unwrap();
        let near = embedder
            .embed("vector search in sqlite databases", EmbeddingPurpose::Document)
            .await
            .unwrap();
        let far = embedder
            .embed("baking sourdough bread at home", EmbeddingPurpose::Document)
            .await
            .unwrap();
        assert!(l2(&query, &near) < l2(&query, &far));
    }

    #[tokio::test]
    async fn empty_text_yields_zero_vector_for_plain_model() {
        let embedder = HashingEmbedder::new("hash-8", 8, false);
        let v = embedder.embed("", EmbeddingPurpose::Document).await.unwrap();
        assert_eq!(v, vec![0.0; 8]);
    }
}
