//! Embedder trait — text to fixed-length vector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// What a piece of text will be used for once embedded.
///
/// Instruction-tuned models produce different vectors for the same text
/// under different purposes, so a vector is only comparable with vectors
/// computed for a compatible purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingPurpose {
    /// Primary text of a stored chunk
    Document,
    /// Stored chunk summary
    Summary,
    /// Stored synthetic question
    Question,
    /// Search query matched against documents and summaries
    Query,
    /// Search query matched against stored questions
    QueryForQuestions,
}

impl EmbeddingPurpose {
    pub fn instruction(&self) -> &'static str {
        match self {
            EmbeddingPurpose::Document => "Represent the document for retrieval: ",
            EmbeddingPurpose::Summary => "Represent the summary for retrieval: ",
            EmbeddingPurpose::Question => "Represent the question for retrieval: ",
            EmbeddingPurpose::Query => {
                "Represent the query for retrieving supporting documents: "
            }
            EmbeddingPurpose::QueryForQuestions => {
                "Represent the query for retrieving similar questions: "
            }
        }
    }
}

/// A loaded embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The catalog name this embedder was built for.
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed one text for the given purpose.
    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<f32>, EmbeddingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_are_distinct() {
        let all = [
            EmbeddingPurpose::Document,
            EmbeddingPurpose::Summary,
            EmbeddingPurpose::Question,
            EmbeddingPurpose::Query,
            EmbeddingPurpose::QueryForQuestions,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.instruction(), b.instruction());
            }
        }
    }
}
