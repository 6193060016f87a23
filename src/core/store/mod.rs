pub mod embeddings;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error::HubResult;

/// A similarity match out of a [`VectorIndex`], before hydration from
/// the metadata store.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
}

/// Durable JSON document storage keyed by (kind, id). `put` upserts.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put(&self, kind: &str, id: &str, body: &Value) -> HubResult<()>;
    async fn get(&self, kind: &str, id: &str) -> HubResult<Option<Value>>;
    /// Returns whether a document was actually removed.
    async fn delete(&self, kind: &str, id: &str) -> HubResult<bool>;
    async fn list(&self, kind: &str) -> HubResult<Vec<Value>>;
}

/// Nearest-neighbour search over named embedding spaces. A space is
/// created lazily on first upsert.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, space: &str, id: &str, vector: &[f32]) -> HubResult<()>;
    async fn search(&self, space: &str, vector: &[f32], limit: usize) -> HubResult<Vec<VectorHit>>;
    async fn remove(&self, space: &str, id: &str) -> HubResult<bool>;
}

/// Turns text into a fixed-width embedding vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> HubResult<Vec<f32>>;
    fn dimension(&self) -> usize;
}
