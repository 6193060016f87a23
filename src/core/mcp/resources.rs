use serde_json::{Value, json};

use super::ProtocolServer;
use crate::core::error::{HubError, HubResult};

pub(crate) fn catalog() -> Vec<Value> {
    vec![
        json!({
            "uri": "hub://tasks/human",
            "name": "Human tasks",
            "description": "Every human task on the board",
            "mimeType": "application/json",
        }),
        json!({
            "uri": "hub://tasks/human/{id}",
            "name": "Human task",
            "description": "One human task by id",
            "mimeType": "application/json",
        }),
        json!({
            "uri": "hub://tasks/agent/{agentName}/{id}",
            "name": "Agent task",
            "description": "One agent task by agent name and id",
            "mimeType": "application/json",
        }),
        json!({
            "uri": "hub://knowledge/collections",
            "name": "Knowledge collections",
            "description": "Knowledge collections ranked by entry count",
            "mimeType": "application/json",
        }),
        json!({
            "uri": "hub://servers",
            "name": "Registered servers",
            "description": "Downstream tool servers and their tool counts",
            "mimeType": "application/json",
        }),
    ]
}

impl ProtocolServer {
    pub(crate) async fn read_resource(&self, uri: &str) -> HubResult<Value> {
        let text = match uri.strip_prefix("hub://") {
            Some("tasks/human") => {
                serde_json::to_string_pretty(&self.tasks.list_human_tasks().await?)?
            }
            Some("knowledge/collections") => {
                serde_json::to_string_pretty(&self.registry.popular_collections(Some(20)).await?)?
            }
            Some("servers") => serde_json::to_string_pretty(&self.registry.list_servers().await?)?,
            Some(rest) if rest.starts_with("tasks/human/") => {
                let id = &rest["tasks/human/".len()..];
                serde_json::to_string_pretty(&self.tasks.get_human_task(id).await?)?
            }
            Some(rest) if rest.starts_with("tasks/agent/") => {
                let mut parts = rest["tasks/agent/".len()..].splitn(2, '/');
                let agent_name = parts.next().unwrap_or_default();
                let id = parts.next().unwrap_or_default();
                if agent_name.is_empty() || id.is_empty() {
                    return Err(HubError::Validation(format!(
                        "agent task resource uri must look like hub://tasks/agent/{{agentName}}/{{id}}, got '{}'",
                        uri
                    )));
                }
                let task = self.tasks.get_agent_task(id).await?;
                if task.agent_name != agent_name {
                    return Err(HubError::NotFound(format!(
                        "agent task '{}' is not assigned to '{}'",
                        id, agent_name
                    )));
                }
                serde_json::to_string_pretty(&task)?
            }
            _ => {
                return Err(HubError::NotFound(format!(
                    "unknown resource uri '{}'",
                    uri
                )));
            }
        };
        Ok(json!({
            "contents": [{"uri": uri, "mimeType": "application/json", "text": text}],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_server;
    use super::*;

    #[tokio::test]
    async fn agent_task_uri_checks_the_agent_name() {
        let (server, _dir) = test_server();
        let human = server.tasks.create_human_task("ship").await.unwrap();
        let task = server
            .tasks
            .create_agent_task(
                serde_json::from_value(json!({
                    "humanTaskId": human.id,
                    "agentName": "builder",
                    "role": "implement",
                    "todos": ["x"],
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let uri = format!("hub://tasks/agent/builder/{}", task.id);
        let result = server.read_resource(&uri).await.unwrap();
        assert_eq!(result["contents"][0]["uri"], uri);

        let wrong = format!("hub://tasks/agent/reviewer/{}", task.id);
        assert!(matches!(
            server.read_resource(&wrong).await.unwrap_err(),
            HubError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn collections_resource_lists_ranked_collections() {
        let (server, _dir) = test_server();
        server
            .registry
            .upsert_knowledge("auth", "entry", Value::Null)
            .await
            .unwrap();

        let result = server
            .read_resource("hub://knowledge/collections")
            .await
            .unwrap();
        let text = result["contents"][0]["text"].as_str().unwrap();
        let stats: Value = serde_json::from_str(text).unwrap();
        assert_eq!(stats[0]["collection"], "auth");
        assert_eq!(stats[0]["entryCount"], 1);
    }

    #[tokio::test]
    async fn malformed_agent_uri_is_a_validation_error() {
        let (server, _dir) = test_server();
        assert!(matches!(
            server
                .read_resource("hub://tasks/agent/only-agent")
                .await
                .unwrap_err(),
            HubError::Validation(_)
        ));
    }
}
