use serde_json::{Value, json};

use super::ProtocolServer;
use crate::core::error::{HubError, HubResult};
use crate::core::tasks::types::NewAgentTask;

fn tool(name: &str, description: &str, schema: Value) -> Value {
    json!({"name": name, "description": description, "inputSchema": schema})
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({"type": "object", "properties": properties, "required": required})
}

fn str_prop(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

pub(crate) fn catalog() -> Vec<Value> {
    vec![
        tool(
            "create_human_task",
            "Record a human work request as the root of a task hierarchy",
            schema(
                json!({"prompt": str_prop("The human's request, verbatim")}),
                &["prompt"],
            ),
        ),
        tool(
            "create_agent_task",
            "Assign an agent a task under a human task, with its TODO list",
            schema(
                json!({
                    "humanTaskId": str_prop("Parent human task id"),
                    "agentName": str_prop("Agent receiving the work"),
                    "role": str_prop("What this agent is responsible for"),
                    "todos": {
                        "type": "array",
                        "description": "TODO items: plain strings or {description, filePath, functionName, contextHint, notes}",
                        "items": {"type": ["string", "object"]},
                    },
                    "contextSummary": str_prop("Context the agent needs up front"),
                    "filesModified": {"type": "array", "items": {"type": "string"}},
                    "knowledgeCollections": {"type": "array", "items": {"type": "string"}},
                    "priorWorkSummary": str_prop("What previous agents already did"),
                }),
                &["humanTaskId", "agentName", "role", "todos"],
            ),
        ),
        tool(
            "list_human_tasks",
            "List every human task on the board",
            schema(json!({}), &[]),
        ),
        tool(
            "list_agent_tasks",
            "List agent tasks, optionally filtered by parent task or agent",
            schema(
                json!({
                    "humanTaskId": str_prop("Only tasks under this human task"),
                    "agentName": str_prop("Only tasks assigned to this agent"),
                }),
                &[],
            ),
        ),
        tool(
            "update_task_status",
            "Set a task's status; human tasks are checked first, then agent tasks",
            schema(
                json!({
                    "taskId": str_prop("Human or agent task id"),
                    "status": {"type": "string", "enum": ["pending", "in_progress", "completed", "blocked"]},
                    "notes": str_prop("Optional progress notes"),
                }),
                &["taskId", "status"],
            ),
        ),
        tool(
            "update_todo_status",
            "Set one TODO item's status; completing the last one completes the agent task",
            schema(
                json!({
                    "agentTaskId": str_prop("Owning agent task id"),
                    "todoId": str_prop("TODO item id"),
                    "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]},
                    "notes": str_prop("Optional progress notes"),
                }),
                &["agentTaskId", "todoId", "status"],
            ),
        ),
        tool(
            "add_task_prompt_notes",
            "Pin human guidance to an agent task (max 5000 chars, markup stripped)",
            schema(
                json!({
                    "agentTaskId": str_prop("Agent task id"),
                    "promptNotes": str_prop("The guidance text"),
                }),
                &["agentTaskId", "promptNotes"],
            ),
        ),
        tool(
            "update_task_prompt_notes",
            "Replace the pinned guidance on an agent task",
            schema(
                json!({
                    "agentTaskId": str_prop("Agent task id"),
                    "promptNotes": str_prop("The replacement text"),
                }),
                &["agentTaskId", "promptNotes"],
            ),
        ),
        tool(
            "clear_task_prompt_notes",
            "Remove the pinned guidance from an agent task",
            schema(json!({"agentTaskId": str_prop("Agent task id")}), &["agentTaskId"]),
        ),
        tool(
            "add_todo_prompt_notes",
            "Pin human guidance to one TODO item",
            schema(
                json!({
                    "agentTaskId": str_prop("Owning agent task id"),
                    "todoId": str_prop("TODO item id"),
                    "promptNotes": str_prop("The guidance text"),
                }),
                &["agentTaskId", "todoId", "promptNotes"],
            ),
        ),
        tool(
            "update_todo_prompt_notes",
            "Replace the pinned guidance on one TODO item",
            schema(
                json!({
                    "agentTaskId": str_prop("Owning agent task id"),
                    "todoId": str_prop("TODO item id"),
                    "promptNotes": str_prop("The replacement text"),
                }),
                &["agentTaskId", "todoId", "promptNotes"],
            ),
        ),
        tool(
            "clear_todo_prompt_notes",
            "Remove the pinned guidance from one TODO item",
            schema(
                json!({
                    "agentTaskId": str_prop("Owning agent task id"),
                    "todoId": str_prop("TODO item id"),
                }),
                &["agentTaskId", "todoId"],
            ),
        ),
        tool(
            "upsert_knowledge",
            "Store a knowledge entry in a collection and index it for semantic search",
            schema(
                json!({
                    "collection": str_prop("Collection the entry belongs to"),
                    "text": str_prop("The knowledge text"),
                    "metadata": {"type": "object", "description": "Optional structured metadata"},
                }),
                &["collection", "text"],
            ),
        ),
        tool(
            "query_knowledge",
            "Semantic search within one knowledge collection",
            schema(
                json!({
                    "collection": str_prop("Collection to search"),
                    "query": str_prop("What to look for"),
                    "limit": {"type": "integer", "description": "Max results, 1-20 (default 5)"},
                }),
                &["collection", "query"],
            ),
        ),
        tool(
            "discover_tools",
            "Semantic search across every registered server's tools",
            schema(
                json!({
                    "query": str_prop("Capability you are looking for"),
                    "limit": {"type": "integer", "description": "Max results, 1-20 (default 5)"},
                }),
                &["query"],
            ),
        ),
        tool(
            "get_tool_schema",
            "Fetch the full input schema of one tool by exact name",
            schema(json!({"toolName": str_prop("Exact tool name")}), &["toolName"]),
        ),
        tool(
            "execute_tool",
            "Execute a tool on whichever registered server owns it",
            schema(
                json!({
                    "toolName": str_prop("Exact tool name"),
                    "arguments": {"type": "object", "description": "Arguments passed through to the tool"},
                }),
                &["toolName"],
            ),
        ),
        tool(
            "mcp_add_server",
            "Register a downstream MCP server and discover its tools",
            schema(
                json!({
                    "serverName": str_prop("Unique server name"),
                    "serverUrl": str_prop("HTTP endpoint speaking JSON-RPC"),
                    "description": str_prop("Optional description"),
                }),
                &["serverName", "serverUrl"],
            ),
        ),
        tool(
            "mcp_rediscover_server",
            "Refresh a registered server's tool catalog",
            schema(json!({"serverName": str_prop("Registered server name")}), &["serverName"]),
        ),
        tool(
            "mcp_remove_server",
            "Unregister a server and delete its tools from both stores",
            schema(json!({"serverName": str_prop("Registered server name")}), &["serverName"]),
        ),
        tool(
            "clear_task_board",
            "Delete every human and agent task; requires confirm=true",
            schema(
                json!({"confirm": {"type": "boolean", "description": "Must be true"}}),
                &["confirm"],
            ),
        ),
    ]
}

fn text_result(text: String, payload: Value) -> Value {
    json!({"content": [{"type": "text", "text": text}], "structuredContent": payload})
}

fn error_result(message: &str) -> Value {
    json!({
        "content": [{"type": "text", "text": format!("Error: {}", message)}],
        "isError": true,
    })
}

fn require_str<'a>(args: &'a Value, key: &str) -> HubResult<&'a str> {
    match args.get(key).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(HubError::Validation(format!(
            "{} parameter is required and must be a non-empty string",
            key
        ))),
    }
}

fn opt_string(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn opt_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

impl ProtocolServer {
    pub(crate) async fn call_tool(&self, name: &str, args: &Value) -> Value {
        let outcome = match name {
            "create_human_task" => self.tool_create_human_task(args).await,
            "create_agent_task" => self.tool_create_agent_task(args).await,
            "list_human_tasks" => self.tool_list_human_tasks().await,
            "list_agent_tasks" => self.tool_list_agent_tasks(args).await,
            "update_task_status" => self.tool_update_task_status(args).await,
            "update_todo_status" => self.tool_update_todo_status(args).await,
            "add_task_prompt_notes" => self.tool_task_prompt_notes(args, NotesOp::Add).await,
            "update_task_prompt_notes" => self.tool_task_prompt_notes(args, NotesOp::Update).await,
            "clear_task_prompt_notes" => self.tool_task_prompt_notes(args, NotesOp::Clear).await,
            "add_todo_prompt_notes" => self.tool_todo_prompt_notes(args, NotesOp::Add).await,
            "update_todo_prompt_notes" => self.tool_todo_prompt_notes(args, NotesOp::Update).await,
            "clear_todo_prompt_notes" => self.tool_todo_prompt_notes(args, NotesOp::Clear).await,
            "upsert_knowledge" => self.tool_upsert_knowledge(args).await,
            "query_knowledge" => self.tool_query_knowledge(args).await,
            "discover_tools" => self.tool_discover_tools(args).await,
            "get_tool_schema" => self.tool_get_tool_schema(args).await,
            "execute_tool" => self.tool_execute_tool(args).await,
            "mcp_add_server" => self.tool_add_server(args).await,
            "mcp_rediscover_server" => self.tool_rediscover_server(args).await,
            "mcp_remove_server" => self.tool_remove_server(args).await,
            "clear_task_board" => self.tool_clear_task_board(args).await,
            other => Err(HubError::Validation(format!("unknown tool '{}'", other))),
        };
        match outcome {
            Ok(result) => result,
            Err(e) => error_result(&e.to_string()),
        }
    }

    async fn tool_create_human_task(&self, args: &Value) -> HubResult<Value> {
        let prompt = require_str(args, "prompt")?;
        let task = self.tasks.create_human_task(prompt).await?;
        Ok(text_result(
            format!("✓ Human task created\n\nTask ID: {}\nStatus: {}", task.id, task.status.as_str()),
            serde_json::to_value(task)?,
        ))
    }

    async fn tool_create_agent_task(&self, args: &Value) -> HubResult<Value> {
        let input: NewAgentTask = serde_json::from_value(args.clone())
            .map_err(|e| HubError::Validation(format!("invalid agent task input: {}", e)))?;
        let task = self.tasks.create_agent_task(input).await?;
        Ok(text_result(
            format!(
                "✓ Agent task created for {}\n\nTask ID: {}\nTODO items: {}",
                task.agent_name,
                task.id,
                task.todos.len()
            ),
            serde_json::to_value(task)?,
        ))
    }

    async fn tool_list_human_tasks(&self) -> HubResult<Value> {
        let tasks = self.tasks.list_human_tasks().await?;
        Ok(text_result(
            format!("✓ {} human task(s) on the board", tasks.len()),
            serde_json::to_value(tasks)?,
        ))
    }

    async fn tool_list_agent_tasks(&self, args: &Value) -> HubResult<Value> {
        let human_task_id = opt_string(args, "humanTaskId");
        let agent_name = opt_string(args, "agentName");
        let tasks = self
            .tasks
            .list_agent_tasks(human_task_id.as_deref(), agent_name.as_deref())
            .await?;
        Ok(text_result(
            format!("✓ {} agent task(s) matched", tasks.len()),
            serde_json::to_value(tasks)?,
        ))
    }

    async fn tool_update_task_status(&self, args: &Value) -> HubResult<Value> {
        let task_id = require_str(args, "taskId")?;
        let status = require_str(args, "status")?;
        let notes = opt_string(args, "notes");
        let scope = self.tasks.update_task_status(task_id, status, notes).await?;
        Ok(text_result(
            format!(
                "✓ Task status updated\n\nTask ID: {}\nScope: {}\nStatus: {}",
                task_id,
                scope.as_str(),
                status
            ),
            json!({"taskId": task_id, "scope": scope.as_str(), "status": status}),
        ))
    }

    async fn tool_update_todo_status(&self, args: &Value) -> HubResult<Value> {
        let agent_task_id = require_str(args, "agentTaskId")?;
        let todo_id = require_str(args, "todoId")?;
        let status = require_str(args, "status")?;
        let notes = opt_string(args, "notes");
        let (task, auto_completed) = self
            .tasks
            .update_todo_status(agent_task_id, todo_id, status, notes)
            .await?;
        let mut text = format!("✓ TODO status updated\n\nTODO ID: {}\nStatus: {}", todo_id, status);
        if auto_completed {
            text.push_str("\n\nAll TODO items completed; the agent task is now completed");
        }
        Ok(text_result(text, serde_json::to_value(task)?))
    }

    async fn tool_task_prompt_notes(&self, args: &Value, op: NotesOp) -> HubResult<Value> {
        let task_id = require_str(args, "agentTaskId")?;
        let task = match op {
            NotesOp::Add => {
                let notes = require_str(args, "promptNotes")?;
                self.tasks.add_task_prompt_notes(task_id, notes).await?
            }
            NotesOp::Update => {
                let notes = require_str(args, "promptNotes")?;
                self.tasks.update_task_prompt_notes(task_id, notes).await?
            }
            NotesOp::Clear => self.tasks.clear_task_prompt_notes(task_id).await?,
        };
        Ok(text_result(
            format!("✓ Prompt notes {} for task {}", op.past_tense(), task_id),
            serde_json::to_value(task)?,
        ))
    }

    async fn tool_todo_prompt_notes(&self, args: &Value, op: NotesOp) -> HubResult<Value> {
        let agent_task_id = require_str(args, "agentTaskId")?;
        let todo_id = require_str(args, "todoId")?;
        let task = match op {
            NotesOp::Add => {
                let notes = require_str(args, "promptNotes")?;
                self.tasks
                    .add_todo_prompt_notes(agent_task_id, todo_id, notes)
                    .await?
            }
            NotesOp::Update => {
                let notes = require_str(args, "promptNotes")?;
                self.tasks
                    .update_todo_prompt_notes(agent_task_id, todo_id, notes)
                    .await?
            }
            NotesOp::Clear => {
                self.tasks
                    .clear_todo_prompt_notes(agent_task_id, todo_id)
                    .await?
            }
        };
        Ok(text_result(
            format!("✓ Prompt notes {} for TODO {}", op.past_tense(), todo_id),
            serde_json::to_value(task)?,
        ))
    }

    async fn tool_upsert_knowledge(&self, args: &Value) -> HubResult<Value> {
        let collection = require_str(args, "collection")?;
        let text = require_str(args, "text")?;
        let metadata = args.get("metadata").cloned().unwrap_or(Value::Null);
        let entry = self
            .registry
            .upsert_knowledge(collection, text, metadata)
            .await?;
        Ok(text_result(
            format!(
                "✓ Knowledge stored\n\nID: {}\nCollection: {}",
                entry.id, entry.collection
            ),
            serde_json::to_value(entry)?,
        ))
    }

    async fn tool_query_knowledge(&self, args: &Value) -> HubResult<Value> {
        let collection = require_str(args, "collection")?;
        let query = require_str(args, "query")?;
        let limit = opt_i64(args, "limit");
        let matches = self
            .registry
            .query_knowledge(collection, query, limit)
            .await?;
        Ok(text_result(
            format!("✓ {} result(s) in '{}'", matches.len(), collection),
            serde_json::to_value(matches)?,
        ))
    }

    async fn tool_discover_tools(&self, args: &Value) -> HubResult<Value> {
        let query = require_str(args, "query")?;
        let limit = opt_i64(args, "limit");
        let matches = self.registry.discover_tools(query, limit).await?;
        let mut text = format!("✓ {} tool(s) matched", matches.len());
        for m in &matches {
            text.push_str(&format!(
                "\n- {} ({}): {}",
                m.tool_name, m.server_name, m.description
            ));
        }
        Ok(text_result(text, serde_json::to_value(matches)?))
    }

    async fn tool_get_tool_schema(&self, args: &Value) -> HubResult<Value> {
        let tool_name = require_str(args, "toolName")?;
        let def = self.registry.get_tool_schema(tool_name).await?;
        Ok(text_result(
            format!("✓ Schema for {} (served by {})", def.tool_name, def.server_name),
            serde_json::to_value(def)?,
        ))
    }

    async fn tool_execute_tool(&self, args: &Value) -> HubResult<Value> {
        let tool_name = require_str(args, "toolName")?;
        let arguments = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let result = self.registry.execute_tool(tool_name, arguments).await?;
        Ok(text_result(
            format!("✓ {} executed", tool_name),
            result,
        ))
    }

    async fn tool_add_server(&self, args: &Value) -> HubResult<Value> {
        let name = require_str(args, "serverName")?;
        let url = require_str(args, "serverUrl")?;
        let description = opt_string(args, "description");
        let summary = self.registry.add_server(name, url, description).await?;
        Ok(text_result(
            format!(
                "✓ Server '{}' registered\n\nTools stored: {} (skipped {}, index failures {})",
                name, summary.stored, summary.skipped, summary.index_failures
            ),
            serde_json::to_value(summary)?,
        ))
    }

    async fn tool_rediscover_server(&self, args: &Value) -> HubResult<Value> {
        let name = require_str(args, "serverName")?;
        let summary = self.registry.rediscover_server(name).await?;
        Ok(text_result(
            format!(
                "✓ Server '{}' rediscovered\n\nTools stored: {} (skipped {}, index failures {})",
                name, summary.stored, summary.skipped, summary.index_failures
            ),
            serde_json::to_value(summary)?,
        ))
    }

    async fn tool_remove_server(&self, args: &Value) -> HubResult<Value> {
        let name = require_str(args, "serverName")?;
        let removed = self.registry.remove_server(name).await?;
        Ok(text_result(
            format!("✓ Server '{}' removed along with {} tool(s)", name, removed),
            json!({"serverName": name, "toolsRemoved": removed}),
        ))
    }

    async fn tool_clear_task_board(&self, args: &Value) -> HubResult<Value> {
        let confirm = args.get("confirm").and_then(Value::as_bool).unwrap_or(false);
        let (humans, agents) = self.tasks.clear_board(confirm).await?;
        Ok(text_result(
            format!(
                "✓ Task board cleared\n\nHuman tasks deleted: {}\nAgent tasks deleted: {}",
                humans, agents
            ),
            json!({"humanTasksDeleted": humans, "agentTasksDeleted": agents}),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum NotesOp {
    Add,
    Update,
    Clear,
}

impl NotesOp {
    fn past_tense(&self) -> &'static str {
        match self {
            NotesOp::Add => "added",
            NotesOp::Update => "updated",
            NotesOp::Clear => "cleared",
        }
    }
}
