mod knowledge;
mod servers;
mod tools;

pub use knowledge::{CollectionStat, KnowledgeEntry, KnowledgeMatch};
pub use servers::{DiscoverySummary, ServerMetadata};
pub use tools::{ToolDefinition, ToolMatch};

use std::sync::Arc;

use crate::core::mcp::client::McpHttpClient;
use crate::core::store::{EmbeddingClient, MetadataStore, VectorIndex};

pub(crate) const KIND_KNOWLEDGE: &str = "knowledge";
pub(crate) const KIND_TOOL: &str = "tool";
pub(crate) const KIND_SERVER: &str = "server";
pub(crate) const TOOLS_SPACE: &str = "mcp_tools";

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const MAX_SEARCH_LIMIT: usize = 20;

/// Dual-indexed registry for knowledge entries and downstream tool
/// definitions: exact records in the metadata store, searchable text in
/// the vector index under the same id. Writes hit the metadata store
/// first; reads always search the index and then hydrate.
pub struct Registry {
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    mcp: McpHttpClient,
}

impl Registry {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            mcp: McpHttpClient::new(),
        }
    }
}

/// Search limits are clamped to 1..=20, defaulting to 5 when absent or
/// non-positive.
pub(crate) fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 => (n as usize).min(MAX_SEARCH_LIMIT),
        _ => DEFAULT_SEARCH_LIMIT,
    }
}

pub(crate) fn knowledge_space(collection: &str) -> String {
    format!("knowledge_{}", collection)
}
