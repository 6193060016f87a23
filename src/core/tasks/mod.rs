pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::{HubError, HubResult};
use crate::core::store::MetadataStore;
use types::{
    AgentTask, HumanTask, NewAgentTask, TaskStatus, TodoStatus, can_transition,
    sanitize_prompt_notes,
};

pub(crate) const KIND_HUMAN_TASK: &str = "human_task";
pub(crate) const KIND_AGENT_TASK: &str = "agent_task";

/// Which record an id resolved to during a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    Human,
    Agent,
}

impl TaskScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskScope::Human => "human",
            TaskScope::Agent => "agent",
        }
    }
}

/// The three-level task hierarchy over the metadata store. Todo
/// completion checks are serialized per agent task so two concurrent
/// updates cannot both miss the auto-completion.
pub struct TaskBoard {
    store: Arc<dyn MetadataStore>,
    todo_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskBoard {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            todo_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn completion_lock(&self, agent_task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.todo_locks.lock().await;
        locks
            .entry(agent_task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn save_human(&self, task: &HumanTask) -> HubResult<()> {
        self.store
            .put(KIND_HUMAN_TASK, &task.id, &serde_json::to_value(task)?)
            .await
    }

    async fn save_agent(&self, task: &AgentTask) -> HubResult<()> {
        self.store
            .put(KIND_AGENT_TASK, &task.id, &serde_json::to_value(task)?)
            .await
    }

    pub async fn create_human_task(&self, prompt: &str) -> HubResult<HumanTask> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(HubError::Validation(
                "prompt parameter is required and must be a non-empty string".into(),
            ));
        }
        let task = HumanTask::new(prompt.to_string());
        self.save_human(&task).await?;
        info!(task_id = %task.id, "human task created");
        Ok(task)
    }

    pub async fn get_human_task(&self, id: &str) -> HubResult<HumanTask> {
        match self.store.get(KIND_HUMAN_TASK, id).await? {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Err(HubError::NotFound(format!("human task '{}' not found", id))),
        }
    }

    pub async fn list_human_tasks(&self) -> HubResult<Vec<HumanTask>> {
        let mut tasks = Vec::new();
        for v in self.store.list(KIND_HUMAN_TASK).await? {
            tasks.push(serde_json::from_value(v)?);
        }
        Ok(tasks)
    }

    pub async fn create_agent_task(&self, input: NewAgentTask) -> HubResult<AgentTask> {
        for (field, value) in [
            ("humanTaskId", &input.human_task_id),
            ("agentName", &input.agent_name),
            ("role", &input.role),
        ] {
            if value.trim().is_empty() {
                return Err(HubError::Validation(format!(
                    "{} parameter is required and must be a non-empty string",
                    field
                )));
            }
        }
        if input.todos.is_empty() {
            return Err(HubError::Validation(
                "todos parameter is required and must be a non-empty array".into(),
            ));
        }
        // The parent has to exist before fanning work out under it.
        self.get_human_task(&input.human_task_id).await?;

        let mut todos = Vec::with_capacity(input.todos.len());
        for todo in input.todos {
            todos.push(todo.into_item()?);
        }

        let now = Utc::now();
        let task = AgentTask {
            id: uuid::Uuid::new_v4().to_string(),
            human_task_id: input.human_task_id,
            agent_name: input.agent_name,
            role: input.role,
            status: TaskStatus::Pending,
            todos,
            context_summary: input.context_summary,
            files_modified: input.files_modified,
            knowledge_collections: input.knowledge_collections,
            prior_work_summary: input.prior_work_summary,
            notes: None,
            prompt_notes: types::PromptNotes::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.save_agent(&task).await?;
        info!(task_id = %task.id, agent = %task.agent_name, todos = task.todos.len(), "agent task created");
        Ok(task)
    }

    pub async fn get_agent_task(&self, id: &str) -> HubResult<AgentTask> {
        match self.store.get(KIND_AGENT_TASK, id).await? {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Err(HubError::NotFound(format!("agent task '{}' not found", id))),
        }
    }

    pub async fn list_agent_tasks(
        &self,
        human_task_id: Option<&str>,
        agent_name: Option<&str>,
    ) -> HubResult<Vec<AgentTask>> {
        let mut tasks = Vec::new();
        for v in self.store.list(KIND_AGENT_TASK).await? {
            let task: AgentTask = serde_json::from_value(v)?;
            if let Some(h) = human_task_id {
                if task.human_task_id != h {
                    continue;
                }
            }
            if let Some(a) = agent_name {
                if task.agent_name != a {
                    continue;
                }
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Updates a task's status, probing human tasks first and agent
    /// tasks second, so one id namespace serves both levels.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: &str,
        notes: Option<String>,
    ) -> HubResult<TaskScope> {
        let status = TaskStatus::parse(status)?;

        if let Some(v) = self.store.get(KIND_HUMAN_TASK, task_id).await? {
            let mut task: HumanTask = serde_json::from_value(v)?;
            check_transition(task.status, status)?;
            task.status = status;
            task.updated_at = Utc::now();
            task.completed_at = match status {
                TaskStatus::Completed => task.completed_at.or_else(|| Some(Utc::now())),
                _ => None,
            };
            if let Some(n) = notes {
                task.notes = Some(n);
            }
            self.save_human(&task).await?;
            return Ok(TaskScope::Human);
        }

        if let Some(v) = self.store.get(KIND_AGENT_TASK, task_id).await? {
            let mut task: AgentTask = serde_json::from_value(v)?;
            check_transition(task.status, status)?;
            task.status = status;
            task.updated_at = Utc::now();
            task.completed_at = match status {
                TaskStatus::Completed => task.completed_at.or_else(|| Some(Utc::now())),
                _ => None,
            };
            if let Some(n) = notes {
                task.notes = Some(n);
            }
            self.save_agent(&task).await?;
            return Ok(TaskScope::Agent);
        }

        Err(HubError::NotFound(format!(
            "task '{}' not found among human or agent tasks",
            task_id
        )))
    }

    /// Updates one todo and, when that leaves every todo completed,
    /// completes the parent agent task. The whole sequence holds the
    /// task's completion lock; repeating the same update is a no-op.
    pub async fn update_todo_status(
        &self,
        agent_task_id: &str,
        todo_id: &str,
        status: &str,
        notes: Option<String>,
    ) -> HubResult<(AgentTask, bool)> {
        let status = TodoStatus::parse(status)?;
        let lock = self.completion_lock(agent_task_id).await;
        let _guard = lock.lock().await;

        let mut task = self.get_agent_task(agent_task_id).await?;
        let todo = task
            .todos
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or_else(|| {
                HubError::NotFound(format!(
                    "todo '{}' not found in agent task '{}'",
                    todo_id, agent_task_id
                ))
            })?;
        todo.status = status;
        todo.completed_at = match status {
            TodoStatus::Completed => todo.completed_at.or_else(|| Some(Utc::now())),
            _ => None,
        };
        if let Some(n) = notes {
            todo.notes = Some(n);
        }
        task.updated_at = Utc::now();
        self.save_agent(&task).await?;

        // Re-read before deciding, so the check sees exactly what was
        // persisted.
        let task = self.get_agent_task(agent_task_id).await?;
        let all_done =
            !task.todos.is_empty() && task.todos.iter().all(|t| t.status == TodoStatus::Completed);
        if all_done && task.status != TaskStatus::Completed {
            let mut task = task;
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.updated_at = Utc::now();
            task.notes = Some("All TODO items completed".to_string());
            self.save_agent(&task).await?;
            info!(task_id = %task.id, "agent task auto-completed");
            return Ok((task, true));
        }
        Ok((task, false))
    }

    pub async fn add_task_prompt_notes(&self, task_id: &str, notes: &str) -> HubResult<AgentTask> {
        let text = sanitize_prompt_notes(notes)?;
        let mut task = self.get_agent_task(task_id).await?;
        task.prompt_notes.add(text);
        task.updated_at = Utc::now();
        self.save_agent(&task).await?;
        Ok(task)
    }

    pub async fn update_task_prompt_notes(
        &self,
        task_id: &str,
        notes: &str,
    ) -> HubResult<AgentTask> {
        let text = sanitize_prompt_notes(notes)?;
        let mut task = self.get_agent_task(task_id).await?;
        task.prompt_notes.update(text);
        task.updated_at = Utc::now();
        self.save_agent(&task).await?;
        Ok(task)
    }

    pub async fn clear_task_prompt_notes(&self, task_id: &str) -> HubResult<AgentTask> {
        let mut task = self.get_agent_task(task_id).await?;
        task.prompt_notes.clear();
        task.updated_at = Utc::now();
        self.save_agent(&task).await?;
        Ok(task)
    }

    async fn with_todo_notes(
        &self,
        agent_task_id: &str,
        todo_id: &str,
        apply: impl FnOnce(&mut types::PromptNotes),
    ) -> HubResult<AgentTask> {
        let mut task = self.get_agent_task(agent_task_id).await?;
        let todo = task
            .todos
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or_else(|| {
                HubError::NotFound(format!(
                    "todo '{}' not found in agent task '{}'",
                    todo_id, agent_task_id
                ))
            })?;
        apply(&mut todo.prompt_notes);
        task.updated_at = Utc::now();
        self.save_agent(&task).await?;
        Ok(task)
    }

    pub async fn add_todo_prompt_notes(
        &self,
        agent_task_id: &str,
        todo_id: &str,
        notes: &str,
    ) -> HubResult<AgentTask> {
        let text = sanitize_prompt_notes(notes)?;
        self.with_todo_notes(agent_task_id, todo_id, |n| n.add(text))
            .await
    }

    pub async fn update_todo_prompt_notes(
        &self,
        agent_task_id: &str,
        todo_id: &str,
        notes: &str,
    ) -> HubResult<AgentTask> {
        let text = sanitize_prompt_notes(notes)?;
        self.with_todo_notes(agent_task_id, todo_id, |n| n.update(text))
            .await
    }

    pub async fn clear_todo_prompt_notes(
        &self,
        agent_task_id: &str,
        todo_id: &str,
    ) -> HubResult<AgentTask> {
        self.with_todo_notes(agent_task_id, todo_id, |n| n.clear())
            .await
    }

    /// Wipes every task at both levels. Requires explicit confirmation.
    pub async fn clear_board(&self, confirm: bool) -> HubResult<(usize, usize)> {
        if !confirm {
            return Err(HubError::Validation(
                "confirm must be set to true to clear the task board".into(),
            ));
        }
        let humans = self.delete_all(KIND_HUMAN_TASK).await?;
        let agents = self.delete_all(KIND_AGENT_TASK).await?;
        self.todo_locks.lock().await.clear();
        info!(humans, agents, "task board cleared");
        Ok((humans, agents))
    }

    async fn delete_all(&self, kind: &str) -> HubResult<usize> {
        let mut deleted = 0;
        for v in self.store.list(kind).await? {
            if let Some(id) = v.get("id").and_then(Value::as_str) {
                if self.store.delete(kind, id).await? {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}

fn check_transition(from: TaskStatus, to: TaskStatus) -> HubResult<()> {
    if !can_transition(from, to) {
        return Err(HubError::Validation(format!(
            "cannot move task from {} to {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::types::*;
    use super::*;
    use crate::core::store::sqlite::test_store;
    use serde_json::json;

    fn board() -> (TaskBoard, tempfile::TempDir) {
        let (store, dir) = test_store();
        (TaskBoard::new(store), dir)
    }

    fn new_agent_task(human_task_id: &str, agent: &str, items: &[&str]) -> NewAgentTask {
        serde_json::from_value(json!({
            "humanTaskId": human_task_id,
            "agentName": agent,
            "role": "implement",
            "todos": items,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let (board, _dir) = board();
        assert!(matches!(
            board.create_human_task("  ").await,
            Err(HubError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn agent_task_requires_existing_parent() {
        let (board, _dir) = board();
        let err = board
            .create_agent_task(new_agent_task("missing", "builder", &["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[tokio::test]
    async fn agent_task_requires_todos() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship it").await.unwrap();
        let mut input = new_agent_task(&human.id, "builder", &["x"]);
        input.todos = vec![];
        assert!(matches!(
            board.create_agent_task(input).await,
            Err(HubError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn completing_every_todo_completes_the_agent_task() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship the feature").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["a", "b", "c"]))
            .await
            .unwrap();
        let ids: Vec<String> = task.todos.iter().map(|t| t.id.clone()).collect();

        let (task, auto) = board
            .update_todo_status(&task.id, &ids[0], "completed", None)
            .await
            .unwrap();
        assert!(!auto);
        assert_eq!(task.status, TaskStatus::Pending);

        let (task, auto) = board
            .update_todo_status(&task.id, &ids[1], "completed", None)
            .await
            .unwrap();
        assert!(!auto);

        let (task, auto) = board
            .update_todo_status(&task.id, &ids[2], "completed", None)
            .await
            .unwrap();
        assert!(auto);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.notes.as_deref(), Some("All TODO items completed"));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn repeated_todo_update_is_idempotent() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["only"]))
            .await
            .unwrap();
        let todo_id = task.todos[0].id.clone();

        let (task, auto) = board
            .update_todo_status(&task.id, &todo_id, "completed", None)
            .await
            .unwrap();
        assert!(auto);
        let completed_at = task.completed_at;

        let (task, auto) = board
            .update_todo_status(&task.id, &todo_id, "completed", None)
            .await
            .unwrap();
        assert!(!auto);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, completed_at);
        assert_eq!(task.notes.as_deref(), Some("All TODO items completed"));
    }

    #[tokio::test]
    async fn blocked_is_not_a_todo_status() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["only"]))
            .await
            .unwrap();
        let err = board
            .update_todo_status(&task.id, &task.todos[0].id, "blocked", None)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
    }

    #[tokio::test]
    async fn reopening_a_todo_clears_its_completion() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["a", "b"]))
            .await
            .unwrap();
        let first = task.todos[0].id.clone();

        board
            .update_todo_status(&task.id, &first, "completed", None)
            .await
            .unwrap();
        let (task, _) = board
            .update_todo_status(&task.id, &first, "pending", None)
            .await
            .unwrap();
        assert_eq!(task.todos[0].status, TodoStatus::Pending);
        assert!(task.todos[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn status_update_probes_human_then_agent() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let agent = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["x"]))
            .await
            .unwrap();

        let scope = board
            .update_task_status(&human.id, "in_progress", None)
            .await
            .unwrap();
        assert_eq!(scope, TaskScope::Human);

        let scope = board
            .update_task_status(&agent.id, "in_progress", Some("started".into()))
            .await
            .unwrap();
        assert_eq!(scope, TaskScope::Agent);
        let agent = board.get_agent_task(&agent.id).await.unwrap();
        assert_eq!(agent.status, TaskStatus::InProgress);
        assert_eq!(agent.notes.as_deref(), Some("started"));

        let err = board
            .update_task_status("nope", "completed", None)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[tokio::test]
    async fn blocked_task_must_resume_before_completing() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        board
            .update_task_status(&human.id, "in_progress", None)
            .await
            .unwrap();
        board
            .update_task_status(&human.id, "blocked", None)
            .await
            .unwrap();
        let err = board
            .update_task_status(&human.id, "completed", None)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));

        board
            .update_task_status(&human.id, "in_progress", None)
            .await
            .unwrap();
        board
            .update_task_status(&human.id, "completed", None)
            .await
            .unwrap();
        let human = board.get_human_task(&human.id).await.unwrap();
        assert_eq!(human.status, TaskStatus::Completed);
        assert!(human.completed_at.is_some());
    }

    #[tokio::test]
    async fn task_prompt_notes_roundtrip() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["x"]))
            .await
            .unwrap();

        let task = board
            .add_task_prompt_notes(&task.id, "focus on the edge cases")
            .await
            .unwrap();
        assert_eq!(
            task.prompt_notes.human_prompt_notes.as_deref(),
            Some("focus on the edge cases")
        );
        let added = task.prompt_notes.human_prompt_notes_added_at.unwrap();

        let task = board
            .update_task_prompt_notes(&task.id, "also check error paths")
            .await
            .unwrap();
        assert_eq!(task.prompt_notes.human_prompt_notes_added_at.unwrap(), added);
        assert_eq!(
            task.prompt_notes.human_prompt_notes.as_deref(),
            Some("also check error paths")
        );

        let task = board.clear_task_prompt_notes(&task.id).await.unwrap();
        assert!(task.prompt_notes.human_prompt_notes.is_none());
        assert!(task.prompt_notes.human_prompt_notes_added_at.is_none());
    }

    #[tokio::test]
    async fn todo_prompt_notes_roundtrip() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["x"]))
            .await
            .unwrap();
        let todo_id = task.todos[0].id.clone();

        let task = board
            .add_todo_prompt_notes(&task.id, &todo_id, "start here")
            .await
            .unwrap();
        assert_eq!(
            task.todos[0].prompt_notes.human_prompt_notes.as_deref(),
            Some("start here")
        );

        let task = board
            .clear_todo_prompt_notes(&task.id, &todo_id)
            .await
            .unwrap();
        assert!(task.todos[0].prompt_notes.human_prompt_notes.is_none());

        let err = board
            .add_todo_prompt_notes(&task.id, "missing", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[tokio::test]
    async fn oversized_prompt_notes_are_rejected() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["x"]))
            .await
            .unwrap();
        let long = "a".repeat(MAX_PROMPT_NOTES_CHARS + 1);
        assert!(matches!(
            board.add_task_prompt_notes(&task.id, &long).await,
            Err(HubError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn list_agent_tasks_filters_by_parent_and_agent() {
        let (board, _dir) = board();
        let h1 = board.create_human_task("first").await.unwrap();
        let h2 = board.create_human_task("second").await.unwrap();
        board
            .create_agent_task(new_agent_task(&h1.id, "builder", &["x"]))
            .await
            .unwrap();
        board
            .create_agent_task(new_agent_task(&h1.id, "reviewer", &["y"]))
            .await
            .unwrap();
        board
            .create_agent_task(new_agent_task(&h2.id, "builder", &["z"]))
            .await
            .unwrap();

        assert_eq!(board.list_agent_tasks(None, None).await.unwrap().len(), 3);
        assert_eq!(
            board
                .list_agent_tasks(Some(&h1.id), None)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            board
                .list_agent_tasks(None, Some("builder"))
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            board
                .list_agent_tasks(Some(&h1.id), Some("builder"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn clear_board_requires_confirmation() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        board
            .create_agent_task(new_agent_task(&human.id, "builder", &["x"]))
            .await
            .unwrap();

        assert!(matches!(
            board.clear_board(false).await,
            Err(HubError::Validation(_))
        ));

        let (humans, agents) = board.clear_board(true).await.unwrap();
        assert_eq!((humans, agents), (1, 1));
        assert!(board.list_human_tasks().await.unwrap().is_empty());
        assert!(board.list_agent_tasks(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_board_drops_completion_locks() {
        let (board, _dir) = board();
        let human = board.create_human_task("ship").await.unwrap();
        let task = board
            .create_agent_task(new_agent_task(&human.id, "builder", &["a", "b"]))
            .await
            .unwrap();
        board
            .update_todo_status(&task.id, &task.todos[0].id, "in_progress", None)
            .await
            .unwrap();
        assert_eq!(board.todo_locks.lock().await.len(), 1);

        board.clear_board(true).await.unwrap();
        assert!(board.todo_locks.lock().await.is_empty());
    }
}
