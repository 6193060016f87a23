use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::EmbeddingClient;
use crate::core::error::{HubError, HubResult};

pub const DEFAULT_DIMENSION: usize = 1536;
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const MAX_ATTEMPTS: u32 = 3;

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint with
/// exponential backoff between attempts.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: String, api_key: String, model: String, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> HubResult<Vec<f32>> {
        let body = json!({ "model": self.model, "input": text });
        let mut last_err = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
            let sent = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .timeout(Duration::from_secs(30))
                .json(&body)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: EmbeddingResponse = resp
                        .json()
                        .await
                        .map_err(|e| HubError::Upstream(format!("embedding response: {}", e)))?;
                    let Some(row) = parsed.data.into_iter().next() else {
                        return Err(HubError::Upstream(
                            "embedding response contained no vectors".into(),
                        ));
                    };
                    if row.embedding.len() != self.dimension {
                        return Err(HubError::Upstream(format!(
                            "embedding has {} dimensions, expected {}",
                            row.embedding.len(),
                            self.dimension
                        )));
                    }
                    return Ok(row.embedding);
                }
                Ok(resp) => {
                    last_err = format!("status {}", resp.status());
                    warn!(attempt, "embedding request failed: {}", last_err);
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!(attempt, "embedding request failed: {}", last_err);
                }
            }
        }
        Err(HubError::Upstream(format!(
            "embedding request failed after {} attempts: {}",
            MAX_ATTEMPTS, last_err
        )))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic fallback used when no embedding endpoint is
/// configured. Hashes whitespace-delimited tokens into a fixed-width
/// vector, so texts sharing words land near each other. Not a semantic
/// model, but stable across runs and good enough to keep search usable
/// offline.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

/// Probes per token. A single bucket per token is too collision-prone
/// at small dimensions; spreading each token over several buckets keeps
/// shared-word similarity intact even when one bucket collides.
const HASH_PROBES: usize = 4;

fn fnv1a(token: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in token.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

// splitmix64 finalizer, used to derive the follow-up probes.
fn remix(mut h: u64) -> u64 {
    h ^= h >> 30;
    h = h.wrapping_mul(0xbf58476d1ce4e5b9);
    h ^= h >> 27;
    h = h.wrapping_mul(0x94d049bb133111eb);
    h ^ (h >> 31)
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, text: &str) -> HubResult<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
        {
            if token.is_empty() {
                continue;
            }
            let mut h = fnv1a(token);
            for _ in 0..HASH_PROBES {
                let idx = (h % self.dimension as u64) as usize;
                let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
                v[idx] += sign;
                h = remix(h);
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Picks the embedding backend from the environment: the HTTP client
/// when OPENAI_API_KEY is set, the hash fallback otherwise.
pub fn client_from_env() -> Arc<dyn EmbeddingClient> {
    let dimension = std::env::var("HUB_EMBEDDING_DIM")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_DIMENSION);
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            let endpoint = std::env::var("HUB_EMBEDDINGS_URL")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
            let model = std::env::var("HUB_EMBEDDING_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string());
            info!("using remote embeddings: {} ({})", endpoint, model);
            Arc::new(HttpEmbeddingClient::new(endpoint, key, model, dimension))
        }
        _ => {
            info!("no embedding API key configured, using hash embeddings");
            Arc::new(HashEmbeddingClient::new(dimension))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn hash_embeddings_are_deterministic() {
        let client = HashEmbeddingClient::new(64);
        let a = client.embed("deploy the auth service").await.unwrap();
        let b = client.embed("deploy the auth service").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn shared_words_pull_vectors_together() {
        let client = HashEmbeddingClient::new(64);
        let a = client.embed("the quick brown fox").await.unwrap();
        let b = client.embed("a fast fox").await.unwrap();
        let c = client.embed("database migration checklist").await.unwrap();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let client = HashEmbeddingClient::new(64);
        let v = client.embed("some text").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let client = HashEmbeddingClient::new(64);
        let v = client.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
