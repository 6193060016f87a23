use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::{KIND_KNOWLEDGE, Registry, clamp_limit, knowledge_space};
use crate::core::error::{HubError, HubResult};
use crate::core::store::{EmbeddingClient, MetadataStore, VectorIndex};

fn index_leg_failure(id: &str, e: HubError) -> HubError {
    HubError::PartialFailure(format!(
        "knowledge entry '{}' was stored but indexing failed ({}); re-run the upsert to make it searchable",
        id, e
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub collection: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeMatch {
    pub id: String,
    pub collection: String,
    pub text: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStat {
    pub collection: String,
    pub entry_count: usize,
}

impl Registry {
    /// Stores a knowledge entry, then indexes it for semantic search.
    /// When the index leg fails after the record is durable, the error
    /// is a PartialFailure naming the entry so the caller can re-upsert
    /// instead of unknowingly serving a record search cannot find.
    pub async fn upsert_knowledge(
        &self,
        collection: &str,
        text: &str,
        metadata: Value,
    ) -> HubResult<KnowledgeEntry> {
        let collection = collection.trim();
        let text = text.trim();
        if collection.is_empty() {
            return Err(HubError::Validation(
                "collection parameter is required and must be a non-empty string".into(),
            ));
        }
        if text.is_empty() {
            return Err(HubError::Validation(
                "text parameter is required and must be a non-empty string".into(),
            ));
        }

        let entry = KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            collection: collection.to_string(),
            text: text.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        self.store
            .put(KIND_KNOWLEDGE, &entry.id, &serde_json::to_value(&entry)?)
            .await?;

        let vector = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| index_leg_failure(&entry.id, e))?;
        self.index
            .upsert(&knowledge_space(collection), &entry.id, &vector)
            .await
            .map_err(|e| index_leg_failure(&entry.id, e))?;
        Ok(entry)
    }

    /// Semantic search within one collection: embed the query, take the
    /// nearest ids, hydrate each record from the metadata store.
    pub async fn query_knowledge(
        &self,
        collection: &str,
        query: &str,
        limit: Option<i64>,
    ) -> HubResult<Vec<KnowledgeMatch>> {
        let collection = collection.trim();
        let query = query.trim();
        if collection.is_empty() {
            return Err(HubError::Validation(
                "collection parameter is required and must be a non-empty string".into(),
            ));
        }
        if query.is_empty() {
            return Err(HubError::Validation(
                "query parameter is required and must be a non-empty string".into(),
            ));
        }
        let limit = clamp_limit(limit);

        let vector = self.embedder.embed(query).await?;
        let hits = self
            .index
            .search(&knowledge_space(collection), &vector, limit)
            .await?;

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(record) = self.store.get(KIND_KNOWLEDGE, &hit.id).await? else {
                warn!(id = %hit.id, "index hit has no metadata record, skipping");
                continue;
            };
            let entry: KnowledgeEntry = serde_json::from_value(record)?;
            matches.push(KnowledgeMatch {
                id: entry.id,
                collection: entry.collection,
                text: entry.text,
                metadata: entry.metadata,
                score: hit.score,
            });
        }
        Ok(matches)
    }

    /// Collections ranked by entry count, busiest first.
    pub async fn popular_collections(&self, limit: Option<i64>) -> HubResult<Vec<CollectionStat>> {
        let limit = clamp_limit(limit);
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for record in self.store.list(KIND_KNOWLEDGE).await? {
            if let Some(collection) = record.get("collection").and_then(Value::as_str) {
                *counts.entry(collection.to_string()).or_default() += 1;
            }
        }
        let mut stats: Vec<CollectionStat> = counts
            .into_iter()
            .map(|(collection, entry_count)| CollectionStat {
                collection,
                entry_count,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.entry_count
                .cmp(&a.entry_count)
                .then_with(|| a.collection.cmp(&b.collection))
        });
        stats.truncate(limit);
        Ok(stats)
    }
}
