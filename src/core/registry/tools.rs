use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::{KIND_SERVER, KIND_TOOL, Registry, TOOLS_SPACE, clamp_limit};
use crate::core::error::{HubError, HubResult};
use crate::core::registry::servers::ServerMetadata;
use crate::core::store::{EmbeddingClient, MetadataStore, VectorIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub id: String,
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMatch {
    pub tool_name: String,
    pub server_name: String,
    pub description: String,
    pub score: f32,
}

/// Documents and vectors for a tool share one key, so both sides of
/// the dual write can be addressed together.
pub(crate) fn tool_key(server_name: &str, tool_name: &str) -> String {
    format!("{}/{}", server_name, tool_name)
}

impl Registry {
    /// Dual-writes one tool definition. The searchable text is
    /// "name: description". Re-storing an existing (server, tool) pair
    /// keeps its id and creation time.
    pub(crate) async fn store_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        description: &str,
        input_schema: Value,
    ) -> HubResult<()> {
        let key = tool_key(server_name, tool_name);
        let now = Utc::now();
        let (id, created_at) = match self.store.get(KIND_TOOL, &key).await? {
            Some(existing) => {
                let prior: ToolDefinition = serde_json::from_value(existing)?;
                (prior.id, prior.created_at)
            }
            None => (Uuid::new_v4().to_string(), now),
        };
        let def = ToolDefinition {
            id,
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            description: description.to_string(),
            input_schema,
            created_at,
            updated_at: now,
        };
        self.store
            .put(KIND_TOOL, &key, &serde_json::to_value(&def)?)
            .await?;

        let text = format!("{}: {}", tool_name, description);
        let partial = |e: HubError| {
            HubError::PartialFailure(format!(
                "tool '{}' was stored but indexing failed ({}); rediscover server '{}' to reconcile",
                key, e, server_name
            ))
        };
        match self.embedder.embed(&text).await {
            Ok(vector) => self
                .index
                .upsert(TOOLS_SPACE, &key, &vector)
                .await
                .map_err(partial),
            Err(e) => Err(partial(e)),
        }
    }

    /// Semantic search over every registered server's tools.
    pub async fn discover_tools(
        &self,
        query: &str,
        limit: Option<i64>,
    ) -> HubResult<Vec<ToolMatch>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(HubError::Validation(
                "query parameter is required and must be a non-empty string".into(),
            ));
        }
        let limit = clamp_limit(limit);
        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(TOOLS_SPACE, &vector, limit).await?;

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(record) = self.store.get(KIND_TOOL, &hit.id).await? else {
                warn!(key = %hit.id, "tool index hit has no metadata record, skipping");
                continue;
            };
            let def: ToolDefinition = serde_json::from_value(record)?;
            matches.push(ToolMatch {
                tool_name: def.tool_name,
                server_name: def.server_name,
                description: def.description,
                score: hit.score,
            });
        }
        Ok(matches)
    }

    /// Exact lookup by tool name across all servers.
    pub async fn get_tool_schema(&self, tool_name: &str) -> HubResult<ToolDefinition> {
        let tool_name = tool_name.trim();
        if tool_name.is_empty() {
            return Err(HubError::Validation(
                "toolName parameter is required and must be a non-empty string".into(),
            ));
        }
        for record in self.store.list(KIND_TOOL).await? {
            let def: ToolDefinition = serde_json::from_value(record)?;
            if def.tool_name == tool_name {
                return Ok(def);
            }
        }
        Err(HubError::NotFound(format!(
            "tool '{}' not found; use discover_tools to search the catalog",
            tool_name
        )))
    }

    /// Resolves the owning server and forwards `tools/call`, returning
    /// the downstream result verbatim. No retries; the caller sees
    /// exactly one attempt's outcome.
    pub async fn execute_tool(&self, tool_name: &str, arguments: Value) -> HubResult<Value> {
        let def = self.get_tool_schema(tool_name).await?;
        let record = self
            .store
            .get(KIND_SERVER, &def.server_name)
            .await?
            .ok_or_else(|| {
                HubError::NotFound(format!(
                    "server '{}' owning tool '{}' is not registered",
                    def.server_name, tool_name
                ))
            })?;
        let server: ServerMetadata = serde_json::from_value(record)?;
        self.mcp
            .call_tool(&server.server_url, &def.tool_name, arguments)
            .await
    }

    pub(crate) async fn tools_for_server(&self, server_name: &str) -> HubResult<Vec<ToolDefinition>> {
        let mut defs = Vec::new();
        for record in self.store.list(KIND_TOOL).await? {
            let def: ToolDefinition = serde_json::from_value(record)?;
            if def.server_name == server_name {
                defs.push(def);
            }
        }
        Ok(defs)
    }

    /// Removes a server's tools, vector entries first so a crash
    /// leaves orphaned metadata rather than index hits that hydrate to
    /// nothing. Returns how many definitions were removed.
    pub(crate) async fn remove_server_tools(&self, server_name: &str) -> HubResult<usize> {
        let mut removed = 0;
        for def in self.tools_for_server(server_name).await? {
            let key = tool_key(&def.server_name, &def.tool_name);
            self.index.remove(TOOLS_SPACE, &key).await?;
            if self.store.delete(KIND_TOOL, &key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
