//! OpenAI-compatible remote embedder.
//!
//! Works with OpenAI, Ollama, vLLM, llama.cpp, and any endpoint exposing
//! `POST {base_url}/embeddings` in the OpenAI wire format. Remote models are
//! not instruction-tuned, so the purpose hint is not sent.

use async_trait::async_trait;
use serde::Deserialize;
use tether_core::embedding::{Embedder, EmbeddingPurpose};
use tether_core::error::EmbeddingError;
use tracing::debug;

/// An embedding model served over HTTP.
pub struct RemoteEmbedder {
    model_name: String,
    dimensions: usize,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RemoteEmbedder {
    /// Create a new remote embedder.
    pub fn new(
        model_name: impl Into<String>,
        dimensions: usize,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| EmbeddingError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            model_name: model_name.into(),
            dimensions,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
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
        let url = format!("{}/embeddings", self.base_url);

        let body = serde_json::json!({
            "model": self.model_name,
            "input": [text],
            "encoding_format": "float",
        });

        debug!(
            model = %self.model_name,
            purpose = ?purpose,
            chars = text.len(),
            "Sending embedding request"
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(EmbeddingError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(EmbeddingError::NotConfigured(format!(
                "embedding endpoint for '{}' rejected the API key",
                self.model_name
            )));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: EmbeddingApiResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vector = api_resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".into()))?;

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                model: self.model_name.clone(),
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}

// --- API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
