//! Session context management for ferrocode.
//!
//! - `ContextManager` owns the per-session message log, token accounting,
//!   and LLM-assisted compaction.
//! - `SessionStorage` abstracts persistence; `JsonStorage` keeps one JSON
//!   document per session, `SqliteStorage` keeps one relational table.
//! - `PromptManager` loads named `.md` templates with optional hot reload.

pub mod json_store;
pub mod manager;
pub mod prompt;
pub mod sqlite_store;
pub mod storage;

pub use json_store::JsonStorage;
pub use manager::{ContextConfig, ContextManager};
pub use prompt::PromptManager;
pub use sqlite_store::SqliteStorage;
pub use storage::{new_session_storage, SessionStorage, StorageType};
