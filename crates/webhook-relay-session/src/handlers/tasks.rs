//! Agent task tracking.

use async_trait::async_trait;
use serde_json::{Value, json};
use webhook_relay_core::{
    Session,
    envelope::unix_timestamp,
    traits::{AgentTask, TaskStatus},
};

use super::{CommandError, CommandHandler, CommandOutput, required_str, str_field};

fn parse_status(data: &Value) -> Result<Option<TaskStatus>, CommandError> {
    data.get("status")
        .filter(|v| !v.is_null())
        .map(|v| {
            serde_json::from_value(v.clone())
                .map_err(|_| CommandError::InvalidArgument(format!("Invalid task status: {v}")))
        })
        .transpose()
}

/// Handles `create_task`, `get_task`, `update_task` and `list_tasks`.
#[derive(Debug, Default, Clone)]
pub struct TaskTracker;

impl TaskTracker {
    async fn create(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let task_id = match str_field(data, "task_id") {
            Some(id) => id.to_string(),
            None => format!("task_{}", session.summary().await?.stats.tasks + 1),
        };
        if session.get_task(&task_id).await?.is_some() {
            return Err(CommandError::InvalidArgument(format!(
                "Task '{task_id}' already exists"
            )));
        }

        let task = AgentTask {
            task_id: task_id.clone(),
            agent_name: str_field(data, "agent_name").unwrap_or("unassigned").to_string(),
            task_type: str_field(data, "task_type").unwrap_or("general").to_string(),
            data: data.get("data").cloned().unwrap_or_else(|| json!({})),
            status: TaskStatus::Pending,
            created: unix_timestamp(),
            started: None,
            completed: None,
            result: None,
            error: None,
        };
        session.add_task(task.clone()).await?;

        tracing::info!(session_id = session.id(), task_id = %task_id, "Created task");
        Ok(CommandOutput::new(
            format!("Task '{task_id}' created"),
            json!({"task": task}),
        ))
    }

    async fn get(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let task_id = required_str(data, "task_id")?;
        let task = session
            .get_task(task_id)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("Task '{task_id}' not found")))?;
        Ok(CommandOutput::new(
            format!("Task '{task_id}' retrieved"),
            json!({"task": task}),
        ))
    }

    async fn update(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let task_id = required_str(data, "task_id")?;
        let mut task = session
            .get_task(task_id)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("Task '{task_id}' not found")))?;

        let now = unix_timestamp();
        if let Some(status) = parse_status(data)? {
            match status {
                TaskStatus::InProgress if task.started.is_none() => task.started = Some(now),
                TaskStatus::Completed | TaskStatus::Failed => {
                    task.started.get_or_insert(now);
                    task.completed = Some(now);
                }
                _ => {}
            }
            task.status = status;
        }
        if let Some(result) = data.get("result").filter(|v| !v.is_null()) {
            task.result = Some(result.clone());
        }
        if let Some(error) = str_field(data, "error") {
            task.error = Some(error.to_string());
        }

        session.update_task(task.clone()).await?;
        tracing::info!(session_id = session.id(), task_id, status = ?task.status, "Updated task");
        Ok(CommandOutput::new(
            format!("Task '{task_id}' updated"),
            json!({"task": task}),
        ))
    }

    async fn list(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let tasks = session.list_tasks(parse_status(data)?).await?;
        let count = tasks.len();
        Ok(CommandOutput::new(
            format!("Found {count} tasks"),
            json!({"tasks": tasks, "count": count}),
        ))
    }
}

#[async_trait]
impl CommandHandler for TaskTracker {
    fn name(&self) -> &str {
        "task_tracker"
    }

    fn can_handle(&self, command: &str, _data: &Value) -> bool {
        matches!(command, "create_task" | "get_task" | "update_task" | "list_tasks")
    }

    async fn execute(
        &self,
        command: &str,
        data: &Value,
        session: &dyn Session,
    ) -> Result<CommandOutput, CommandError> {
        match command {
            "create_task" => self.create(data, session).await,
            "get_task" => self.get(data, session).await,
            "update_task" => self.update(data, session).await,
            "list_tasks" => self.list(data, session).await,
            other => Err(CommandError::NoHandler(other.to_string())),
        }
    }
}
