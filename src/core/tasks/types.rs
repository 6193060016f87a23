use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{HubError, HubResult};

pub const MAX_PROMPT_NOTES_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> HubResult<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(HubError::Validation(format!(
                "invalid status '{}': must be one of pending, in_progress, completed, blocked",
                other
            ))),
        }
    }
}

/// Task transition table. Blocked tasks resume through in_progress
/// before completing; completed tasks can only be reopened.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Completed)
            | (Pending, Blocked)
            | (InProgress, Completed)
            | (InProgress, Blocked)
            | (InProgress, Pending)
            | (Blocked, InProgress)
            | (Blocked, Pending)
            | (Completed, InProgress)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> HubResult<Self> {
        match s {
            "pending" => Ok(TodoStatus::Pending),
            "in_progress" => Ok(TodoStatus::InProgress),
            "completed" => Ok(TodoStatus::Completed),
            other => Err(HubError::Validation(format!(
                "invalid todo status '{}': must be one of pending, in_progress, completed",
                other
            ))),
        }
    }
}

/// Human guidance pinned to an agent task or a single todo, with the
/// timestamps the annotation tools maintain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_prompt_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_prompt_notes_added_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_prompt_notes_updated_at: Option<DateTime<Utc>>,
}

impl PromptNotes {
    pub fn add(&mut self, text: String) {
        let now = Utc::now();
        self.human_prompt_notes = Some(text);
        self.human_prompt_notes_added_at = Some(now);
        self.human_prompt_notes_updated_at = Some(now);
    }

    pub fn update(&mut self, text: String) {
        let now = Utc::now();
        self.human_prompt_notes = Some(text);
        if self.human_prompt_notes_added_at.is_none() {
            self.human_prompt_notes_added_at = Some(now);
        }
        self.human_prompt_notes_updated_at = Some(now);
    }

    pub fn clear(&mut self) {
        self.human_prompt_notes = None;
        self.human_prompt_notes_added_at = None;
        self.human_prompt_notes_updated_at = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanTask {
    pub id: String,
    pub prompt: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl HumanTask {
    pub fn new(prompt: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            prompt,
            status: TaskStatus::Pending,
            notes: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub id: String,
    pub human_task_id: String,
    pub agent_name: String,
    pub role: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge_collections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_work_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub prompt_notes: PromptNotes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: String,
    pub description: String,
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub prompt_notes: PromptNotes,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Todo creation accepts either a bare description string or a
/// structured object with location hints.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TodoInput {
    Text(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        description: String,
        #[serde(default)]
        file_path: Option<String>,
        #[serde(default)]
        function_name: Option<String>,
        #[serde(default)]
        context_hint: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
}

impl TodoInput {
    pub fn into_item(self) -> HubResult<TodoItem> {
        let (description, file_path, function_name, context_hint, notes) = match self {
            TodoInput::Text(d) => (d, None, None, None, None),
            TodoInput::Detailed {
                description,
                file_path,
                function_name,
                context_hint,
                notes,
            } => (description, file_path, function_name, context_hint, notes),
        };
        let description = description.trim().to_string();
        if description.is_empty() {
            return Err(HubError::Validation(
                "todo description is required and must be a non-empty string".into(),
            ));
        }
        Ok(TodoItem {
            id: Uuid::new_v4().to_string(),
            description,
            status: TodoStatus::Pending,
            file_path,
            function_name,
            context_hint,
            notes,
            prompt_notes: PromptNotes::default(),
            created_at: Utc::now(),
            completed_at: None,
        })
    }
}

/// Input for agent task creation, matching the wire field names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgentTask {
    pub human_task_id: String,
    pub agent_name: String,
    pub role: String,
    #[serde(default)]
    pub todos: Vec<TodoInput>,
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub knowledge_collections: Vec<String>,
    #[serde(default)]
    pub prior_work_summary: Option<String>,
}

static BLOCK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|iframe|object|embed)\b[^>]*>.*?</(script|style|iframe|object|embed)>").unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)</?[a-zA-Z][^>]*>").unwrap());
static JS_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").unwrap());
static EVENT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).unwrap());

/// Caps prompt notes at 5000 characters and strips active markup.
/// Markdown passes through untouched.
pub fn sanitize_prompt_notes(raw: &str) -> HubResult<String> {
    if raw.chars().count() > MAX_PROMPT_NOTES_CHARS {
        return Err(HubError::Validation(format!(
            "prompt notes exceed the maximum length of {} characters",
            MAX_PROMPT_NOTES_CHARS
        )));
    }
    let cleaned = BLOCK_TAGS.replace_all(raw, "");
    let cleaned = EVENT_ATTR.replace_all(&cleaned, "");
    let cleaned = ANY_TAG.replace_all(&cleaned, "");
    let cleaned = JS_URL.replace_all(&cleaned, "");
    Ok(cleaned.trim().to_string())
}
