use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use casegraph_common::TextEmbedder;

const VOYAGE_API_URL: &str = "https://api.voyageai.com/v1";

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Voyage AI embeddings via the OpenAI-compatible endpoint.
pub struct VoyageEmbedder {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl VoyageEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: VOYAGE_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
        };

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Voyage embedding error ({}): {}", status, error_text));
        }

        let body: EmbeddingResponse = response.json().await?;
        Ok(ordered(body.data))
    }
}

/// Responses carry an `index` per item; restore input order when present.
fn ordered(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}

#[async_trait]
impl TextEmbedder for VoyageEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(model = %self.model, chars = text.len(), "Embedding text");
        self.request(serde_json::Value::String(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let embeddings = self
            .request(serde_json::Value::Array(
                texts.into_iter().map(serde_json::Value::String).collect(),
            ))
            .await?;
        if embeddings.len() != expected {
            return Err(anyhow!(
                "Voyage returned {} embeddings for {} inputs",
                embeddings.len(),
                expected
            ));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_response_is_reordered_by_index() {
        let body: EmbeddingResponse = serde_json::from_value(serde_json::json!({
            "data": [
                {"embedding": [2.0], "index": 1},
                {"embedding": [1.0], "index": 0}
            ]
        }))
        .unwrap();
        assert_eq!(ordered(body.data), vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn empty_batch_skips_the_request() {
        let embedder = VoyageEmbedder::new("key", "voyage-3-large").with_base_url("http://127.0.0.1:9");
        assert!(embedder.embed_batch(Vec::new()).await.unwrap().is_empty());
    }
}
