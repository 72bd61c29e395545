//! Task list tools: todo_read and todo_write.
//!
//! The store is a JSON file scoped to the workspace directory
//! (`<workspace>/.ferrocode/todos.json`), so parallel projects keep
//! separate lists. Guarded by its own mutex, independent of the engine.

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::message::{ToolCall, ToolCallResult};
use ferrocode_core::tool::{Tool, ToolExecutor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    fn label(self) -> &'static str {
        match self {
            TodoStatus::Pending => "PENDING",
            TodoStatus::InProgress => "IN PROGRESS",
            TodoStatus::Completed => "COMPLETED",
            TodoStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for TodoPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TodoPriority::High => "high",
            TodoPriority::Medium => "medium",
            TodoPriority::Low => "low",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
}

/// File-backed todo store.
pub struct TodoStore {
    path: PathBuf,
    todos: Mutex<Vec<Todo>>,
}

impl TodoStore {
    /// Store scoped to a workspace directory.
    pub fn for_workspace(workspace: &Path) -> Self {
        Self::at_path(workspace.join(".ferrocode").join("todos.json"))
    }

    /// Store at an explicit file path, loading existing entries.
    pub fn at_path(path: PathBuf) -> Self {
        let todos = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(todos) => todos,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable todo file");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            path,
            todos: Mutex::new(todos),
        }
    }

    /// Snapshot of the current list.
    pub async fn list(&self) -> Vec<Todo> {
        self.todos.lock().await.clone()
    }

    /// Replace the whole list, stamping timestamps, and flush to disk.
    pub async fn replace(&self, mut new_todos: Vec<Todo>) -> Result<(), String> {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        for todo in &mut new_todos {
            if todo.created.is_empty() {
                todo.created = now.clone();
            }
            todo.updated = now.clone();
        }

        let mut todos = self.todos.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create todo directory: {e}"))?;
        }
        let data = serde_json::to_string_pretty(&new_todos)
            .map_err(|e| format!("failed to serialize todos: {e}"))?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| format!("failed to write todo file: {e}"))?;

        *todos = new_todos;
        Ok(())
    }
}

// --- todo_read ---

pub struct TodoReadTool {
    store: Arc<TodoStore>,
}

impl TodoReadTool {
    pub fn new(store: Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let todos = self.store.list().await;

        if todos.is_empty() {
            return Ok(ToolCallResult::ok("No todos found. Todo list is empty."));
        }

        let mut output = format!("Current Todo List ({} items):\n\n", todos.len());

        for status in [
            TodoStatus::InProgress,
            TodoStatus::Pending,
            TodoStatus::Completed,
            TodoStatus::Cancelled,
        ] {
            let group: Vec<&Todo> = todos.iter().filter(|t| t.status == status).collect();
            if group.is_empty() {
                continue;
            }
            output.push_str(&format!("{}:\n", status.label()));
            for todo in group {
                match status {
                    TodoStatus::Pending | TodoStatus::InProgress => {
                        output.push_str(&format!(
                            "  - [{}] {} (Priority: {})\n",
                            todo.id, todo.content, todo.priority
                        ));
                    }
                    _ => output.push_str(&format!("  - [{}] {}\n", todo.id, todo.content)),
                }
            }
            output.push('\n');
        }

        Ok(ToolCallResult::ok(output))
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "todo_read",
            "Read the current todo list with status and priorities.",
            serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

// --- todo_write ---

pub struct TodoWriteTool {
    store: Arc<TodoStore>,
}

impl TodoWriteTool {
    pub fn new(store: Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct TodoWriteParams {
    todos: Vec<Todo>,
}

#[async_trait]
impl ToolExecutor for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        // Unknown status/priority values fail enum deserialization here
        let params: TodoWriteParams =
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                ToolError::InvalidArguments(format!("failed to parse arguments: {e}"))
            })?;

        if params.todos.len() < 2 {
            return Ok(ToolCallResult::failure(
                "at least 2 todo items are required",
            ));
        }

        for (i, todo) in params.todos.iter().enumerate() {
            if todo.id.is_empty() {
                return Ok(ToolCallResult::failure(format!(
                    "todo {}: id is required",
                    i + 1
                )));
            }
            if todo.content.is_empty() {
                return Ok(ToolCallResult::failure(format!(
                    "todo {}: content is required",
                    i + 1
                )));
            }
        }

        if let Err(e) = self.store.replace(params.todos.clone()).await {
            return Ok(ToolCallResult::failure(format!("failed to save todos: {e}")));
        }

        let mut counts: std::collections::HashMap<&'static str, usize> =
            std::collections::HashMap::new();
        for todo in &params.todos {
            *counts.entry(todo.status.label()).or_default() += 1;
        }

        let mut output = format!(
            "Successfully updated todo list with {} items:\n",
            params.todos.len()
        );
        for (status, count) in counts {
            output.push_str(&format!("  - {status}: {count}\n"));
        }

        Ok(ToolCallResult::ok(output))
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "todo_write",
            "Create and manage a structured task list for the current coding session. Replaces \
             the whole list; at least 2 items are required.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "todos": {
                        "type": "array",
                        "minItems": 2,
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {
                                    "type": "string",
                                    "description": "Unique identifier for the todo item"
                                },
                                "content": {
                                    "type": "string",
                                    "minLength": 1,
                                    "description": "The description/content of the todo item"
                                },
                                "status": {
                                    "type": "string",
                                    "enum": ["pending", "in_progress", "completed", "cancelled"],
                                    "description": "Current status of the todo item"
                                },
                                "priority": {
                                    "type": "string",
                                    "enum": ["high", "medium", "low"],
                                    "description": "Priority level of the todo item"
                                }
                            },
                            "required": ["content", "status", "priority", "id"]
                        },
                        "description": "Array of todo items to write to the workspace"
                    }
                },
                "required": ["todos"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        false
    }
}
