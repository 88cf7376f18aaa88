// crates/molt-daemon/src/embedder.rs
//
// HTTP embedder for OpenAI-compatible `/embeddings` endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use molt_core::error::MoltError;
use molt_core::traits::Embedder;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Embedder calling `POST {base_url}/embeddings`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, dimension: usize, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

/// Order vectors by their `index` and check the count matches the input.
fn into_vectors(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, MoltError> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(MoltError::Embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoltError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MoltError::Network(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MoltError::Embedding(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MoltError::Serialization(format!("embedding response: {}", e)))?;
        into_vectors(parsed, texts.len())
    }
}
