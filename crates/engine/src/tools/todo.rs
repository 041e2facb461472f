//! Todo list tool backed by shared task state

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::debug;

use relay_store::{PermissionTier, TodoItem, TodoStatus};

use super::ToolTrait;

/// Replace the task's todo list. The list lives in the checkpoint snapshot,
/// so plans survive pause and resume.
pub struct UpdateTodosTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl UpdateTodosTool {
    pub fn new(todos: Arc<Mutex<Vec<TodoItem>>>) -> Self {
        Self { todos }
    }
}

#[derive(Deserialize)]
struct TodoArg {
    description: String,
    #[serde(default = "default_status")]
    status: String,
}

fn default_status() -> String {
    "pending".to_string()
}

#[derive(Deserialize)]
struct UpdateTodosArgs {
    todos: Vec<TodoArg>,
}

fn parse_status(s: &str) -> Result<TodoStatus, String> {
    match s {
        "pending" => Ok(TodoStatus::Pending),
        "in_progress" => Ok(TodoStatus::InProgress),
        "done" => Ok(TodoStatus::Done),
        other => Err(format!(
            "unknown todo status '{}', expected pending, in_progress or done",
            other
        )),
    }
}

#[async_trait]
impl ToolTrait for UpdateTodosTool {
    fn name(&self) -> &str {
        "update_todos"
    }
    fn description(&self) -> &str {
        "Replace the task todo list. Each entry has a description and a status: pending, in_progress or done."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "The complete todo list, in order",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "done"] }
                        },
                        "required": ["description"]
                    }
                }
            },
            "required": ["todos"]
        })
    }
    fn tier(&self) -> PermissionTier {
        PermissionTier::Safe
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let args: UpdateTodosArgs = serde_json::from_value(args)?;

        let mut items = Vec::with_capacity(args.todos.len());
        for todo in args.todos {
            items.push(TodoItem {
                description: todo.description,
                status: parse_status(&todo.status)?,
            });
        }

        let done = items
            .iter()
            .filter(|t| t.status == TodoStatus::Done)
            .count();
        let total = items.len();
        debug!("todo list updated: {}/{} done", done, total);

        let mut todos = self
            .todos
            .lock()
            .map_err(|_| "todo list lock poisoned".to_string())?;
        *todos = items;

        Ok(format!("todo list updated: {}/{} done", done, total))
    }
}
