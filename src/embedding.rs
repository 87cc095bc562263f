//! Embedding providers.
//!
//! Chunks and queries are embedded through the [`EmbeddingProvider`] trait so
//! the pipeline does not care where vectors come from. Two implementations:
//!
//! - `hash`: deterministic hashed bag-of-words vectors. No network, no model
//!   downloads; the default and the backend used throughout the test suite.
//! - `openai`: the OpenAI embeddings API with retry/backoff on transient
//!   failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::EngineError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Dimensionality of every vector this provider produces.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;
}

/// Embed a single text. Convenience wrapper over [`EmbeddingProvider::embed_batch`].
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, EngineError> {
    let mut vectors = provider.embed_batch(&[text.to_string()]).await?;
    vectors.pop().ok_or_else(|| {
        EngineError::EmbeddingUnavailable("provider returned no vector".to_string())
    })
}

/// Build the configured embedding provider.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashProvider::new(config.dims))),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set for openai provider"))?;
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string());
            Ok(Arc::new(OpenAiProvider::new(
                api_key,
                model,
                config.dims,
                config.max_retries,
                config.timeout_secs,
            )?))
        }
        other => bail!("unknown embedding provider: {}", other),
    }
}

/// Deterministic hashed bag-of-words embeddings.
///
/// Each lowercase alphanumeric token is hashed into one of `dims` buckets;
/// bucket counts are L2-normalized. Identical texts always produce identical
/// vectors, and texts sharing vocabulary land near each other under cosine
/// similarity.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0f32; self.dims];
        let lowered = text.to_lowercase();
        let mut any = false;
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(raw) % self.dims as u64) as usize;
            buckets[bucket] += 1.0;
            any = true;
        }
        if !any {
            // Blank text still needs a valid unit vector.
            buckets.fill(1.0);
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in buckets.iter_mut() {
                *v /= norm;
            }
        }
        buckets
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// OpenAI embeddings API client with retry on transient failures.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model: String,
        dims: usize,
        max_retries: u32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            dims,
            max_retries,
        })
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let retriable_message = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: OpenAiEmbeddingResponse = resp.json().await.map_err(|e| {
                            EngineError::EmbeddingUnavailable(format!(
                                "malformed embeddings response: {}",
                                e
                            ))
                        })?;
                        let mut data = parsed.data;
                        data.sort_by_key(|d| d.index);
                        if data.len() != texts.len() {
                            return Err(EngineError::EmbeddingUnavailable(format!(
                                "expected {} embeddings, got {}",
                                texts.len(),
                                data.len()
                            )));
                        }
                        return Ok(data.into_iter().map(|d| d.embedding).collect());
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        format!("embeddings API returned {}", status)
                    } else {
                        let detail = resp.text().await.unwrap_or_default();
                        return Err(EngineError::EmbeddingUnavailable(format!(
                            "embeddings API returned {}: {}",
                            status, detail
                        )));
                    }
                }
                Err(e) => format!("embeddings request failed: {}", e),
            };

            if attempt > self.max_retries {
                return Err(EngineError::EmbeddingUnavailable(format!(
                    "{} (after {} attempts)",
                    retriable_message, attempt
                )));
            }
            let backoff = 1u64 << (attempt - 1).min(5);
            tracing::warn!(
                attempt,
                backoff_secs = backoff,
                "{}; retrying",
                retriable_message
            );
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_batch(texts).await
    }
}

/// Serialize a vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Inverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        bail!("embedding blob length {} is not a multiple of 4", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Cosine similarity in [-1, 1]. Zero vectors yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0f32;
    let mut na = 0f32;
    let mut nb = 0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Cosine distance in [0, 2]; the metric the ANN index orders by.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let provider = HashProvider::new(128);
        let a = embed_one(&provider, "the current salary is 75000")
            .await
            .unwrap();
        let b = embed_one(&provider, "the current salary is 75000")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
    }

    #[tokio::test]
    async fn hash_provider_batch_matches_single() {
        let provider = HashProvider::new(64);
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let batch = provider.embed_batch(&texts).await.unwrap();
        for (text, vector) in texts.iter().zip(batch.iter()) {
            let single = embed_one(&provider, text).await.unwrap();
            assert_eq!(&single, vector);
        }
    }

    #[tokio::test]
    async fn hash_vectors_are_unit_length() {
        let provider = HashProvider::new(64);
        let v = embed_one(&provider, "vacation policy fifteen days").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let provider = HashProvider::new(256);
        let query = embed_one(&provider, "employee vacation days").await.unwrap();
        let close = embed_one(&provider, "vacation days for every employee")
            .await
            .unwrap();
        let far = embed_one(&provider, "quarterly financial projections")
            .await
            .unwrap();
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0, 0.0];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob).unwrap(), v);
    }

    #[test]
    fn truncated_blob_rejected() {
        assert!(blob_to_vec(&[1, 2, 3]).is_err());
    }

    #[test]
    fn cosine_basics() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &a), 0.0);
    }
}
