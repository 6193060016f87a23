use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use crate::core::error::{HubError, HubResult};
use crate::core::rpc::{RpcRequest, RpcResponse};

pub(crate) const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC over HTTP client for downstream tool servers. Every call
/// carries a bounded timeout; there are no retries here, callers decide
/// whether a failed tool call is worth repeating.
pub struct McpHttpClient {
    http: reqwest::Client,
}

impl McpHttpClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn post_rpc(&self, url: &str, method: &str, params: Value) -> HubResult<Value> {
        debug!(url, method, "outbound rpc call");
        let frame = RpcRequest::new(1, method, Some(params));
        let resp = self
            .http
            .post(url)
            .timeout(RPC_TIMEOUT)
            .json(&frame)
            .send()
            .await
            .map_err(|e| HubError::Upstream(format!("rpc call to {} failed: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(HubError::Upstream(format!(
                "rpc call to {} returned status {}",
                url,
                resp.status()
            )));
        }
        let frame: RpcResponse = resp
            .json()
            .await
            .map_err(|e| HubError::Upstream(format!("invalid rpc response from {}: {}", url, e)))?;
        if let Some(err) = frame.error {
            return Err(HubError::Upstream(format!(
                "{} failed with code {}: {}",
                method, err.code, err.message
            )));
        }
        frame
            .result
            .ok_or_else(|| HubError::Upstream(format!("{} response carried no result", method)))
    }

    /// Raw tool descriptors from the server's `tools/list`. Entries are
    /// returned as-is; the caller decides what counts as well-formed.
    pub async fn list_tools(&self, url: &str) -> HubResult<Vec<Value>> {
        let result = self.post_rpc(url, "tools/list", json!({})).await?;
        Ok(result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn call_tool(&self, url: &str, name: &str, arguments: Value) -> HubResult<Value> {
        self.post_rpc(
            url,
            "tools/call",
            json!({"name": name, "arguments": arguments}),
        )
        .await
    }
}

impl Default for McpHttpClient {
    fn default() -> Self {
        Self::new()
    }
}
