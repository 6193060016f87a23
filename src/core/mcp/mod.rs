pub mod client;
mod prompts;
mod resources;
mod tools;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::core::registry::Registry;
use crate::core::rpc::{self, RpcRequest, RpcResponse};
use crate::core::tasks::TaskBoard;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "agenthub";

/// Stateless dispatcher over a line-delimited JSON-RPC channel. One
/// request per line in, at most one response per line out.
pub struct ProtocolServer {
    pub(crate) tasks: Arc<TaskBoard>,
    pub(crate) registry: Arc<Registry>,
}

impl ProtocolServer {
    pub fn new(tasks: Arc<TaskBoard>, registry: Arc<Registry>) -> Self {
        Self { tasks, registry }
    }

    /// Serves stdin/stdout until EOF. All logging goes to stderr so
    /// stdout stays a clean frame stream.
    pub async fn serve_stdio(&self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(reply) = self.handle_line(&line).await {
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }
        Ok(())
    }

    /// Handles one frame. Returns None for notifications, which get no
    /// reply by contract.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let req: RpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!("dropping unparseable frame: {}", e);
                let resp =
                    RpcResponse::err(Value::Null, rpc::PARSE_ERROR, format!("parse error: {}", e));
                return serde_json::to_string(&resp).ok();
            }
        };
        debug!(method = %req.method, "dispatching request");
        let id = req.id.clone();
        let outcome = self.dispatch(req).await;
        let id = id?;
        let resp = match outcome {
            Ok(result) => RpcResponse::ok(id, result),
            Err((code, message)) => RpcResponse::err(id, code, message),
        };
        serde_json::to_string(&resp).ok()
    }

    async fn dispatch(&self, req: RpcRequest) -> Result<Value, (i64, String)> {
        let params = req.params.unwrap_or_else(|| json!({}));
        match req.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
                "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
            })),
            "notifications/initialized" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({"tools": tools::catalog()})),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or((rpc::INVALID_PARAMS, "name parameter is required".to_string()))?;
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                Ok(self.call_tool(name, &arguments).await)
            }
            "resources/list" => Ok(json!({"resources": resources::catalog()})),
            "resources/read" => {
                let uri = params
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or((rpc::INVALID_PARAMS, "uri parameter is required".to_string()))?;
                self.read_resource(uri)
                    .await
                    .map_err(|e| (rpc::INTERNAL_ERROR, e.to_string()))
            }
            "prompts/list" => Ok(json!({"prompts": prompts::catalog()})),
            "prompts/get" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or((rpc::INVALID_PARAMS, "name parameter is required".to_string()))?;
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                prompts::render(name, &arguments).map_err(|e| (rpc::INVALID_PARAMS, e.to_string()))
            }
            other => Err((
                rpc::METHOD_NOT_FOUND,
                format!("method '{}' is not supported", other),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_server() -> (ProtocolServer, tempfile::TempDir) {
    use crate::core::store::embeddings::HashEmbeddingClient;
    use crate::core::store::sqlite::test_store;

    let (store, dir) = test_store();
    let tasks = Arc::new(TaskBoard::new(store.clone()));
    let registry = Arc::new(Registry::new(
        store.clone(),
        store,
        Arc::new(HashEmbeddingClient::new(64)),
    ));
    (ProtocolServer::new(tasks, registry), dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(server: &ProtocolServer, frame: Value) -> Value {
        let reply = server
            .handle_line(&frame.to_string())
            .await
            .expect("expected a reply");
        serde_json::from_str(&reply).unwrap()
    }

    async fn call_tool(server: &ProtocolServer, name: &str, arguments: Value) -> Value {
        let resp = roundtrip(
            server,
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": name, "arguments": arguments},
            }),
        )
        .await;
        resp["result"].clone()
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let (server, _dir) = test_server();
        let resp = roundtrip(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await;
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["serverInfo"]["name"], SERVER_NAME);
        assert!(resp["result"]["capabilities"].get("tools").is_some());
    }

    #[tokio::test]
    async fn initialized_notification_gets_no_reply() {
        let (server, _dir) = test_server();
        let reply = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (server, _dir) = test_server();
        let resp = roundtrip(
            &server,
            json!({"jsonrpc": "2.0", "id": 9, "method": "bogus/method"}),
        )
        .await;
        assert_eq!(resp["error"]["code"], rpc::METHOD_NOT_FOUND);
        assert_eq!(resp["id"], 9);
    }

    #[tokio::test]
    async fn garbage_input_is_a_parse_error() {
        let (server, _dir) = test_server();
        let reply = server.handle_line("{not json").await.unwrap();
        let resp: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(resp["error"]["code"], rpc::PARSE_ERROR);
        assert_eq!(resp["id"], Value::Null);
    }

    #[tokio::test]
    async fn tools_list_exposes_the_catalog() {
        let (server, _dir) = test_server();
        let resp = roundtrip(
            &server,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await;
        let tools = resp["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        for expected in [
            "create_human_task",
            "create_agent_task",
            "update_todo_status",
            "upsert_knowledge",
            "discover_tools",
            "mcp_add_server",
            "clear_task_board",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
        assert!(tools.iter().all(|t| t.get("inputSchema").is_some()));
    }

    #[tokio::test]
    async fn end_to_end_task_flow_over_the_wire() {
        let (server, _dir) = test_server();

        let created = call_tool(
            &server,
            "create_human_task",
            json!({"prompt": "ship the import feature"}),
        )
        .await;
        assert!(created.get("isError").is_none());
        let human_id = created["structuredContent"]["id"].as_str().unwrap().to_string();

        let created = call_tool(
            &server,
            "create_agent_task",
            json!({
                "humanTaskId": human_id,
                "agentName": "backend",
                "role": "implement the importer",
                "todos": ["parse input", {"description": "write rows", "filePath": "src/db.rs"}],
            }),
        )
        .await;
        let task = &created["structuredContent"];
        let task_id = task["id"].as_str().unwrap().to_string();
        let todo_ids: Vec<String> = task["todos"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(todo_ids.len(), 2);

        for (i, todo_id) in todo_ids.iter().enumerate() {
            let updated = call_tool(
                &server,
                "update_todo_status",
                json!({"agentTaskId": task_id, "todoId": todo_id, "status": "completed"}),
            )
            .await;
            let status = updated["structuredContent"]["status"].as_str().unwrap();
            if i + 1 == todo_ids.len() {
                assert_eq!(status, "completed");
                assert!(updated["content"][0]["text"]
                    .as_str()
                    .unwrap()
                    .contains("All TODO items completed"));
            } else {
                assert_eq!(status, "pending");
            }
        }
    }

    #[tokio::test]
    async fn tool_validation_errors_come_back_as_tool_errors() {
        let (server, _dir) = test_server();
        let result = call_tool(&server, "create_human_task", json!({})).await;
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("prompt parameter is required"));

        let result = call_tool(&server, "no_such_tool", json!({})).await;
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn prompt_notes_tools_take_agent_task_id_and_prompt_notes() {
        let (server, _dir) = test_server();
        let created = call_tool(&server, "create_human_task", json!({"prompt": "annotate"})).await;
        let human_id = created["structuredContent"]["id"].as_str().unwrap().to_string();
        let created = call_tool(
            &server,
            "create_agent_task",
            json!({
                "humanTaskId": human_id,
                "agentName": "builder",
                "role": "implement",
                "todos": ["only"],
            }),
        )
        .await;
        let task_id = created["structuredContent"]["id"].as_str().unwrap().to_string();
        let todo_id = created["structuredContent"]["todos"][0]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let result = call_tool(
            &server,
            "add_task_prompt_notes",
            json!({"agentTaskId": task_id, "promptNotes": "watch the edge cases"}),
        )
        .await;
        assert!(result.get("isError").is_none(), "got {}", result);
        assert_eq!(
            result["structuredContent"]["humanPromptNotes"],
            "watch the edge cases"
        );

        let result = call_tool(
            &server,
            "add_todo_prompt_notes",
            json!({"agentTaskId": task_id, "todoId": todo_id, "promptNotes": "start here"}),
        )
        .await;
        assert!(result.get("isError").is_none(), "got {}", result);
        assert_eq!(
            result["structuredContent"]["todos"][0]["humanPromptNotes"],
            "start here"
        );

        let result = call_tool(
            &server,
            "clear_task_prompt_notes",
            json!({"agentTaskId": task_id}),
        )
        .await;
        assert!(result.get("isError").is_none());
        assert!(result["structuredContent"].get("humanPromptNotes").is_none());
    }

    #[tokio::test]
    async fn resources_read_resolves_parametrized_uris() {
        let (server, _dir) = test_server();
        let created = call_tool(
            &server,
            "create_human_task",
            json!({"prompt": "resource lookup"}),
        )
        .await;
        let human_id = created["structuredContent"]["id"].as_str().unwrap();

        let resp = roundtrip(
            &server,
            json!({
                "jsonrpc": "2.0", "id": 4, "method": "resources/read",
                "params": {"uri": format!("hub://tasks/human/{}", human_id)},
            }),
        )
        .await;
        let text = resp["result"]["contents"][0]["text"].as_str().unwrap();
        let task: Value = serde_json::from_str(text).unwrap();
        assert_eq!(task["prompt"], "resource lookup");

        let resp = roundtrip(
            &server,
            json!({
                "jsonrpc": "2.0", "id": 5, "method": "resources/read",
                "params": {"uri": "hub://nope"},
            }),
        )
        .await;
        assert!(resp.get("error").is_some());
    }

    #[tokio::test]
    async fn prompts_render_with_arguments() {
        let (server, _dir) = test_server();
        let resp = roundtrip(
            &server,
            json!({
                "jsonrpc": "2.0", "id": 6, "method": "prompts/get",
                "params": {"name": "plan_task_breakdown", "arguments": {"task_description": "migrate the billing schema"}},
            }),
        )
        .await;
        let text = resp["result"]["messages"][0]["content"]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("migrate the billing schema"));

        let resp = roundtrip(
            &server,
            json!({
                "jsonrpc": "2.0", "id": 7, "method": "prompts/get",
                "params": {"name": "unknown_prompt"},
            }),
        )
        .await;
        assert!(resp.get("error").is_some());
    }
}
