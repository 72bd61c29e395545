//! # Ferrocode Core
//!
//! Domain types, traits, and error definitions for the ferrocode agent
//! runtime. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod llm;
pub mod message;
pub mod session;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentState, AgentStatus, ChatRequest, ChatResponse};
pub use error::{ContextError, Error, LlmError, PromptError, Result, StorageError, ToolError};
pub use llm::{LlmClient, LlmConfig, LlmProvider, LlmRequest, LlmResponse, StreamChunk, Usage};
pub use message::{Message, Role, ToolCall, ToolCallResult, ToolFunction};
pub use session::SessionContext;
pub use token::count_tokens;
pub use tool::{Tool, ToolExecutor, ToolSchema};
