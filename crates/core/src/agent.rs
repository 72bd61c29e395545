//! Agent-facing request/response types and per-session state.

use crate::llm::Usage;
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A chat request from the surrounding shell (HTTP edge, CLI, tests).
///
/// The shell is responsible for any sentinel wrapping of the message
/// (e.g. `<user_query>…</user_query>`); the core appends it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,

    /// Omitted → the agent generates a fresh session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            stream: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A chat response. In streaming mode, partial chunks arrive with
/// `finished == false` and non-empty `response`; the final chunk has
/// `finished == true` and carries aggregated usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub finished: bool,
    pub usage: Usage,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The agent's lifecycle state for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Thinking,
    ExecutingTools,
    Done,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Thinking => "thinking",
            AgentStatus::ExecutingTools => "executing_tools",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A snapshot of agent state for a session, as returned by `get_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub session_id: String,
    pub status: AgentStatus,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compressed_history: String,
    pub active_tools: Vec<String>,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let req = ChatRequest::new("hello").with_session("s1");
        assert_eq!(req.message, "hello");
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert!(!req.stream);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&AgentStatus::ExecutingTools).unwrap();
        assert_eq!(json, r#""executing_tools""#);
    }

    #[test]
    fn response_roundtrip() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("loop_exhausted".into(), serde_json::json!(true));
        let resp = ChatResponse {
            session_id: "s1".into(),
            response: "done".into(),
            finished: true,
            usage: Usage::default(),
            metadata,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: ChatResponse = serde_json::from_str(&json).unwrap();
        assert!(back.finished);
        assert_eq!(back.metadata["loop_exhausted"], serde_json::json!(true));
    }
}
