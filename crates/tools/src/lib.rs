//! Built-in tools and the tool engine for ferrocode.
//!
//! Tools give the agent the ability to act in the world: read and edit
//! files, run shell commands, search code, fetch web pages, and keep a
//! task list. The `ToolEngine` dispatches batches of calls, running
//! concurrency-safe tools in parallel under a global semaphore and the
//! rest sequentially.

pub mod engine;
pub mod file;
pub mod grep;
pub mod search;
pub mod system;
pub mod task;
pub mod web;

pub use engine::{EngineConfig, ToolEngine};
pub use task::TodoStore;

/// Names of every built-in tool, in definition order.
pub const BUILTIN_TOOLS: &[&str] = &[
    "read",
    "write",
    "edit",
    "multi_edit",
    "glob",
    "grep",
    "ls",
    "bash",
    "todo_read",
    "todo_write",
    "web_search",
    "web_fetch",
];
