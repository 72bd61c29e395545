//! Message domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the user sends a message → the agent loop processes it → the LLM responds,
//! possibly with tool calls → tool results flow back as messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (identity, environment info)
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// A single message in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Free-form metadata. For tool messages this carries
    /// `tool_call_id`, `tool_name`, and `success`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a tool result message linked to the originating call.
    pub fn tool(content: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.metadata = metadata;
        msg
    }

    /// Attach metadata to the message.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The tool call id this message responds to, if it is a tool result.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.metadata.get("tool_call_id").map(|s| s.as_str())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call (matches the provider's id)
    pub id: String,

    /// Call type — always "function" for current providers
    #[serde(rename = "type")]
    pub call_type: String,

    /// The function to invoke
    pub function: ToolFunction,
}

impl ToolCall {
    /// Create a function-typed tool call.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: "function".into(),
            function: ToolFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// The function half of a tool call. `arguments` is an opaque JSON string —
/// the loop never parses it; the targeted tool does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub arguments: String,
}

/// The outcome of executing a single tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The output content
    pub content: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Error description when `success` is false
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    /// When the result was produced
    pub timestamp: DateTime<Utc>,
}

impl ToolCallResult {
    /// A successful result carrying output.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            error: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// A failed result carrying an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            success: false,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn tool_message_links_to_call() {
        let mut meta = HashMap::new();
        meta.insert("tool_call_id".into(), "call_1".into());
        meta.insert("tool_name".into(), "read".into());
        let msg = Message::tool("output", meta);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id(), Some("call_1"));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant_with_tools(
            "Let me check",
            vec![ToolCall::function("t1", "read", r#"{"file_path":"/tmp/x"}"#)],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "Let me check");
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_calls[0].function.name, "read");
        assert_eq!(back.tool_calls[0].call_type, "function");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, r#""assistant""#);
    }

    #[test]
    fn empty_tool_calls_skipped_in_json() {
        let msg = Message::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn result_constructors() {
        let ok = ToolCallResult::ok("data");
        assert!(ok.success);
        assert!(ok.error.is_empty());

        let err = ToolCallResult::failure("boom");
        assert!(!err.success);
        assert_eq!(err.error, "boom");
        assert!(err.content.is_empty());
    }
}
