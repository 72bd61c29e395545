//! Error types for the ferrocode domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all ferrocode operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- LLM errors ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Context/session errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Prompt errors ---
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Cancellation ---
    #[error("Operation cancelled")]
    Cancelled,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {0} not found")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("context cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Unsupported storage type: {0}")]
    UnsupportedType(String),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt '{0}' not found")]
    NotFound(String),

    #[error("Failed to parse template '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("Failed to render template '{name}': {reason}")]
    Render { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_displays_correctly() {
        let err = Error::Llm(LlmError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_not_found_message_matches_engine_contract() {
        // The engine surfaces this text verbatim in failed results.
        let err = ToolError::NotFound("grep".into());
        assert_eq!(err.to_string(), "tool grep not found");
    }

    #[test]
    fn cancelled_tool_error_text() {
        assert_eq!(ToolError::Cancelled.to_string(), "context cancelled");
    }

    #[test]
    fn prompt_not_found_display() {
        let err = PromptError::NotFound("system".into());
        assert!(err.to_string().contains("system"));
    }
}
