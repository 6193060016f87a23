use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{KIND_SERVER, Registry};
use crate::core::error::{HubError, HubResult};
use crate::core::store::MetadataStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub server_name: String,
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tool_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a discovery pass did: how many tool entries the server
/// advertised, how many landed in both stores, how many were skipped
/// as malformed, and how many stored but missed the index leg.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySummary {
    pub server_name: String,
    pub advertised: usize,
    pub stored: usize,
    pub skipped: usize,
    pub index_failures: usize,
}

impl Registry {
    /// Registers a server after a successful `tools/list` probe. A
    /// duplicate name is a conflict before anything is written; an
    /// unreachable server is an upstream error before anything is
    /// written.
    pub async fn add_server(
        &self,
        name: &str,
        url: &str,
        description: Option<String>,
    ) -> HubResult<DiscoverySummary> {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() {
            return Err(HubError::Validation(
                "serverName parameter is required and must be a non-empty string".into(),
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(HubError::Validation(
                "serverUrl must be an http:// or https:// URL".into(),
            ));
        }
        if self.store.get(KIND_SERVER, name).await?.is_some() {
            return Err(HubError::Conflict(format!(
                "server '{}' is already registered; use mcp_rediscover_server to refresh it",
                name
            )));
        }

        let advertised = self.mcp.list_tools(url).await?;

        let now = Utc::now();
        let record = ServerMetadata {
            server_name: name.to_string(),
            server_url: url.to_string(),
            description,
            tool_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store
            .put(KIND_SERVER, name, &serde_json::to_value(&record)?)
            .await?;

        let summary = self.ingest_tools(name, advertised).await?;
        self.set_tool_count(name, summary.stored).await?;
        info!(server = name, stored = summary.stored, "server registered");
        Ok(summary)
    }

    /// Drops the server's tools from both stores and re-runs discovery
    /// against its recorded URL.
    pub async fn rediscover_server(&self, name: &str) -> HubResult<DiscoverySummary> {
        let record = self.get_server(name).await?;
        let advertised = self.mcp.list_tools(&record.server_url).await?;

        let removed = self.remove_server_tools(name).await?;
        let summary = self.ingest_tools(name, advertised).await?;
        self.set_tool_count(name, summary.stored).await?;
        info!(
            server = name,
            removed,
            stored = summary.stored,
            "server rediscovered"
        );
        Ok(summary)
    }

    /// Unregisters a server: tools leave the vector index first, then
    /// the metadata store, then the server record itself, so a crash
    /// mid-removal leaves orphaned tool records but never a dangling
    /// server pointing at deleted tools.
    pub async fn remove_server(&self, name: &str) -> HubResult<usize> {
        self.get_server(name).await?;
        let removed = self.remove_server_tools(name).await?;
        self.store.delete(KIND_SERVER, name).await?;
        info!(server = name, removed, "server removed");
        Ok(removed)
    }

    pub async fn get_server(&self, name: &str) -> HubResult<ServerMetadata> {
        match self.store.get(KIND_SERVER, name).await? {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Err(HubError::NotFound(format!("server '{}' not found", name))),
        }
    }

    pub async fn list_servers(&self) -> HubResult<Vec<ServerMetadata>> {
        let mut servers = Vec::new();
        for v in self.store.list(KIND_SERVER).await? {
            servers.push(serde_json::from_value(v)?);
        }
        Ok(servers)
    }

    /// Stores each advertised tool. Entries without a name are skipped
    /// with a warning; an index-leg failure counts the tool as stored
    /// but unsearchable, which the summary surfaces so the operator can
    /// rediscover.
    async fn ingest_tools(
        &self,
        server_name: &str,
        advertised: Vec<Value>,
    ) -> HubResult<DiscoverySummary> {
        let mut summary = DiscoverySummary {
            server_name: server_name.to_string(),
            advertised: advertised.len(),
            stored: 0,
            skipped: 0,
            index_failures: 0,
        };
        for entry in advertised {
            let Some(tool_name) = entry
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
            else {
                warn!(server = server_name, "skipping tool entry without a name");
                summary.skipped += 1;
                continue;
            };
            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("");
            let schema = entry
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));

            match self
                .store_tool(server_name, tool_name, description, schema)
                .await
            {
                Ok(()) => summary.stored += 1,
                Err(HubError::PartialFailure(msg)) => {
                    warn!(server = server_name, tool = tool_name, "{}", msg);
                    summary.stored += 1;
                    summary.index_failures += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    async fn set_tool_count(&self, name: &str, count: usize) -> HubResult<()> {
        let mut record = self.get_server(name).await?;
        record.tool_count = count;
        record.updated_at = Utc::now();
        self.store
            .put(KIND_SERVER, name, &serde_json::to_value(&record)?)
            .await
    }
}
