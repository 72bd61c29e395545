//! LLM provider adapters for ferrocode.
//!
//! Two wire dialects cover the four supported providers:
//! - `OpenAiCompatClient` — OpenAI, DeepSeek, Ollama, and any other
//!   endpoint speaking `/v1/chat/completions`
//! - `ClaudeClient` — Anthropic's native Messages API
//!
//! Streaming tool-call reassembly is a first-class concern of both
//! adapters: providers deliver tool-call arguments as fragments and the
//! adapter emits fully assembled calls on the terminal chunk.

pub mod claude;
pub mod factory;
pub mod openai_compat;
mod sse;

pub use claude::ClaudeClient;
pub use factory::create_client;
pub use openai_compat::OpenAiCompatClient;
