use serde_json::{Value, json};

use crate::core::error::{HubError, HubResult};

pub(crate) fn catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "plan_task_breakdown",
            "description": "Break a human task into per-agent tasks with concrete TODO items",
            "arguments": [
                {"name": "task_description", "description": "The work to break down", "required": true},
                {"name": "target_agent", "description": "Agent the plan is aimed at, if known", "required": false},
            ],
        }),
        json!({
            "name": "suggest_context_offload",
            "description": "Suggest which context to store as knowledge entries before starting",
            "arguments": [
                {"name": "task_scope", "description": "Scope of the upcoming work", "required": true},
                {"name": "existing_knowledge", "description": "Collections already populated", "required": false},
            ],
        }),
    ]
}

pub(crate) fn render(name: &str, args: &Value) -> HubResult<Value> {
    let text = match name {
        "plan_task_breakdown" => {
            let description = required_arg(args, "task_description")?;
            let target = args.get("target_agent").and_then(Value::as_str);
            let mut text = format!(
                "Break the following task into agent tasks with concrete TODO items.\n\n\
                 Task: {}\n\n\
                 For each agent task provide: the agent's role, 2-6 TODO items with file \
                 paths and function names where known, a context summary, and which \
                 knowledge collections the agent should consult. Prefer small, \
                 independently verifiable TODO items.",
                description
            );
            if let Some(target) = target {
                text.push_str(&format!(
                    "\n\nPlan for a single agent named '{}'.",
                    target
                ));
            }
            text
        }
        "suggest_context_offload" => {
            let scope = required_arg(args, "task_scope")?;
            let mut text = format!(
                "Before starting work scoped as below, list the context worth storing \
                 as knowledge entries so later agents can query it instead of \
                 rediscovering it.\n\n\
                 Scope: {}\n\n\
                 For each suggestion give a collection name, the text to store, and why \
                 a later agent would search for it.",
                scope
            );
            if let Some(existing) = args.get("existing_knowledge").and_then(Value::as_str) {
                text.push_str(&format!(
                    "\n\nAlready populated collections: {}. Avoid duplicating them.",
                    existing
                ));
            }
            text
        }
        other => {
            return Err(HubError::NotFound(format!("unknown prompt '{}'", other)));
        }
    };

    Ok(json!({
        "description": format!("Rendered {} prompt", name),
        "messages": [
            {"role": "user", "content": {"type": "text", "text": text}},
        ],
    }))
}

fn required_arg<'a>(args: &'a Value, key: &str) -> HubResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            HubError::Validation(format!("{} argument is required for this prompt", key))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_and_render_agree_on_names() {
        for prompt in catalog() {
            let name = prompt["name"].as_str().unwrap();
            let args = json!({"task_description": "x", "task_scope": "y"});
            assert!(render(name, &args).is_ok(), "prompt {} failed to render", name);
        }
    }

    #[test]
    fn optional_arguments_change_the_rendering() {
        let with = render(
            "plan_task_breakdown",
            &json!({"task_description": "refactor", "target_agent": "backend"}),
        )
        .unwrap();
        let text = with["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("backend"));

        let without =
            render("plan_task_breakdown", &json!({"task_description": "refactor"})).unwrap();
        let text = without["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(!text.contains("single agent"));
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        assert!(render("plan_task_breakdown", &json!({})).is_err());
        assert!(render("nope", &json!({})).is_err());
    }
}
