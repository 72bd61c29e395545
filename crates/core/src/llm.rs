//! LLM client contract — the abstraction over provider wire formats.
//!
//! An `LlmClient` knows how to send a conversation to a model and get a
//! response back, either complete or as a stream of chunks. The agent loop
//! calls `chat()` / `chat_stream()` without knowing which dialect is behind
//! the trait.
//!
//! Implementations: OpenAI-compatible (OpenAI, DeepSeek, Ollama), Claude.

use crate::error::LlmError;
use crate::message::{Message, ToolCall};
use crate::tool::Tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Known provider dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    DeepSeek,
    Claude,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Claude => "claude",
            LlmProvider::Ollama => "ollama",
        };
        write!(f, "{s}")
    }
}

/// Static configuration of a client, also consumed by the context manager
/// (its `max_tokens` is the default context window for compaction gating).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A chat request.
///
/// `model`, `max_tokens`, and `temperature` override the client's
/// configured defaults when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl LlmRequest {
    /// A request carrying only messages.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            stream: false,
            max_tokens: None,
            temperature: None,
            model: None,
        }
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub id: String,
    pub content: String,
    pub role: String,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another usage record into this one. The agent loop sums
    /// usage across iterations of a turn.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A single chunk in a streaming response.
///
/// Content deltas arrive with `done == false`. Fully reassembled tool calls
/// arrive on the terminal chunk (`done == true`) — reassembly from
/// provider-specific fragments is the adapter's job, not the consumer's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default)]
    pub done: bool,
}

/// The core LLM client trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Which provider dialect this client speaks.
    fn provider(&self) -> LlmProvider;

    /// The client's static configuration.
    fn config(&self) -> &LlmConfig;

    /// Send a request and get a complete response.
    async fn chat(&self, request: LlmRequest) -> std::result::Result<LlmResponse, LlmError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `chat()` and wraps the result as a
    /// single terminal chunk.
    async fn chat_stream(
        &self,
        request: LlmRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, LlmError>>,
        LlmError,
    > {
        let response = self.chat(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                tool_calls: response.tool_calls,
                usage: Some(response.usage),
                done: true,
            }))
            .await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.accumulate(&Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        });
        assert_eq!(total.prompt_tokens, 30);
        assert_eq!(total.completion_tokens, 15);
        assert_eq!(total.total_tokens, 45);
    }

    #[test]
    fn provider_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&LlmProvider::DeepSeek).unwrap(),
            r#""deepseek""#
        );
        assert_eq!(LlmProvider::Claude.to_string(), "claude");
    }

    #[tokio::test]
    async fn default_stream_wraps_chat() {
        struct Fixed;

        #[async_trait]
        impl LlmClient for Fixed {
            fn provider(&self) -> LlmProvider {
                LlmProvider::OpenAi
            }
            fn config(&self) -> &LlmConfig {
                static CONFIG: std::sync::OnceLock<LlmConfig> = std::sync::OnceLock::new();
                CONFIG.get_or_init(|| LlmConfig {
                    provider: LlmProvider::OpenAi,
                    api_key: String::new(),
                    base_url: String::new(),
                    model: "test".into(),
                    max_tokens: 4096,
                    temperature: 0.7,
                })
            }
            async fn chat(
                &self,
                _request: LlmRequest,
            ) -> std::result::Result<LlmResponse, LlmError> {
                Ok(LlmResponse {
                    id: "r1".into(),
                    content: "hello".into(),
                    role: "assistant".into(),
                    usage: Usage {
                        prompt_tokens: 1,
                        completion_tokens: 1,
                        total_tokens: 2,
                    },
                    tool_calls: vec![],
                })
            }
        }

        let mut rx = Fixed
            .chat_stream(LlmRequest::from_messages(vec![]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert_eq!(chunk.usage.unwrap().total_tokens, 2);
    }
}
