//! Session context — the per-conversation message log.

use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A session is an id-addressed conversation with its own ordered message
/// log and token accounting.
///
/// Invariants:
/// - `messages` is append-only during normal operation; compaction is the
///   only permitted shrinkage and it preserves the most recent
///   `history_limit` messages.
/// - `total_tokens` is recomputed from message contents plus any compressed
///   prefix after every mutation.
/// - A non-empty `compressed_history` semantically replaces the messages
///   removed during compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Unique session ID (hyphenated lowercase UUID)
    pub id: String,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// LLM-produced summary of compacted history
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compressed_history: String,

    /// Session-level metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub last_activity: DateTime<Utc>,

    /// Over-estimate of the token footprint of this session
    #[serde(default)]
    pub total_tokens: usize,
}

impl SessionContext {
    /// Create a new empty session with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            compressed_history: String::new(),
            metadata: HashMap::new(),
            created_at: now,
            last_activity: now,
            total_tokens: 0,
        }
    }

    /// Append a message and bump the activity timestamp.
    pub fn push(&mut self, message: Message) {
        self.last_activity = Utc::now();
        self.messages.push(message);
    }

    /// Recompute `total_tokens` from the compressed prefix plus all
    /// retained messages.
    pub fn recount_tokens(&mut self) {
        let mut total = crate::token::count_tokens(&self.compressed_history);
        for msg in &self.messages {
            total += crate::token::count_tokens(&msg.content);
        }
        self.total_tokens = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_preserves_order() {
        let mut session = SessionContext::new("s1");
        session.push(Message::user("first"));
        session.push(Message::user("second"));
        assert_eq!(session.messages[0].content, "first");
        assert_eq!(session.messages[1].content, "second");
    }

    #[test]
    fn push_updates_activity() {
        let mut session = SessionContext::new("s1");
        let created = session.created_at;
        session.push(Message::user("hello"));
        assert!(session.last_activity >= created);
    }

    #[test]
    fn recount_includes_compressed_prefix() {
        let mut session = SessionContext::new("s1");
        session.push(Message::user("12345678")); // 8 chars → 2 tokens
        session.recount_tokens();
        let without_prefix = session.total_tokens;

        session.compressed_history = "x".repeat(40); // 40 chars → 10 tokens
        session.recount_tokens();
        assert_eq!(session.total_tokens, without_prefix + 10);
    }

    #[test]
    fn serialization_roundtrip() {
        let mut session = SessionContext::new("abc");
        session.push(Message::user("hello"));
        session.compressed_history = "earlier summary".into();
        session.recount_tokens();

        let json = serde_json::to_string(&session).unwrap();
        let back: SessionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "abc");
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.compressed_history, "earlier summary");
        assert_eq!(back.total_tokens, session.total_tokens);
    }
}
