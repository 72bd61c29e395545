//! Claude native client implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Dialect differences handled here:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via typed SSE events; tool-call arguments arrive as
//!   `input_json_delta` fragments between block start/stop markers

use crate::sse::SseFeed;
use async_trait::async_trait;
use ferrocode_core::error::LlmError;
use ferrocode_core::llm::{LlmClient, LlmConfig, LlmProvider, LlmRequest, LlmResponse, StreamChunk, Usage};
use ferrocode_core::message::{Message, Role, ToolCall};
use ferrocode_core::tool::Tool;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Claude native Messages API client.
pub struct ClaudeClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl ClaudeClient {
    /// Create a new Claude client.
    pub fn new(mut config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        if config.base_url.is_empty() {
            config.base_url = DEFAULT_BASE_URL.into();
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.provider = LlmProvider::Claude;

        Self { config, client }
    }

    /// Assemble the request body. System messages become the top-level
    /// `system` field; everything else is converted per-message into the
    /// content-block wire format.
    fn request_body(&self, request: &LlmRequest, stream: bool) -> serde_json::Value {
        let system = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<ClaudeMessage> =
            request.messages.iter().filter_map(wire_message).collect();

        let mut body = serde_json::Map::new();
        body.insert(
            "model".into(),
            request
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone())
                .into(),
        );
        body.insert("messages".into(), serde_json::json!(messages));
        body.insert(
            "max_tokens".into(),
            request.max_tokens.unwrap_or(self.config.max_tokens).into(),
        );
        body.insert(
            "temperature".into(),
            serde_json::json!(request.temperature.unwrap_or(self.config.temperature)),
        );

        if !system.is_empty() {
            body.insert("system".into(), system.into());
        }
        if stream {
            body.insert("stream".into(), true.into());
        }
        if !request.tools.is_empty() {
            let tools: Vec<ClaudeTool> = request.tools.iter().map(ClaudeTool::from).collect();
            body.insert("tools".into(), serde_json::json!(tools));
        }

        serde_json::Value::Object(body)
    }

    /// POST the body and map any non-200 status to the matching error.
    async fn post(
        &self,
        body: &serde_json::Value,
        sse: bool,
    ) -> std::result::Result<reqwest::Response, LlmError> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if sse {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        warn!(status, body = %detail, "Claude API error");
        Err(match status {
            429 => LlmError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => LlmError::AuthenticationFailed("Invalid Anthropic API key".into()),
            _ => LlmError::ApiError {
                status_code: status,
                message: detail,
            },
        })
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    fn provider(&self) -> LlmProvider {
        LlmProvider::Claude
    }

    fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn chat(&self, request: LlmRequest) -> std::result::Result<LlmResponse, LlmError> {
        let body = self.request_body(&request, false);
        debug!(provider = "claude", model = %body["model"], "Sending completion request");

        let response = self.post(&body, false).await?;
        let parsed: ClaudeResponse = response.json().await.map_err(|e| LlmError::ApiError {
            status_code: 200,
            message: format!("Failed to parse Claude response: {e}"),
        })?;

        Ok(parsed.into_llm_response())
    }

    async fn chat_stream(
        &self,
        request: LlmRequest,
    ) -> std::result::Result<
        mpsc::Receiver<std::result::Result<StreamChunk, LlmError>>,
        LlmError,
    > {
        let body = self.request_body(&request, true);
        debug!(provider = "claude", model = %body["model"], "Sending streaming request");

        let response = self.post(&body, true).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            relay_claude_stream(response, tx).await;
        });

        Ok(rx)
    }
}

/// Convert one message into the Messages API shape. System messages are
/// handled at the request level and yield nothing here; tool results
/// travel back as user-role `tool_result` blocks.
fn wire_message(msg: &Message) -> Option<ClaudeMessage> {
    match msg.role {
        Role::System => None,

        Role::User => Some(ClaudeMessage {
            role: "user".into(),
            content: ClaudeContent::Text(msg.content.clone()),
        }),

        Role::Tool => Some(ClaudeMessage {
            role: "user".into(),
            content: ClaudeContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: msg.tool_call_id().unwrap_or_default().into(),
                content: msg.content.clone(),
            }]),
        }),

        Role::Assistant if msg.tool_calls.is_empty() => Some(ClaudeMessage {
            role: "assistant".into(),
            content: ClaudeContent::Text(msg.content.clone()),
        }),

        Role::Assistant => {
            let mut blocks = Vec::new();
            if !msg.content.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: msg.content.clone(),
                });
            }
            blocks.extend(msg.tool_calls.iter().map(|tc| ContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: serde_json::from_str(&tc.function.arguments).unwrap_or_default(),
            }));
            Some(ClaudeMessage {
                role: "assistant".into(),
                content: ClaudeContent::Blocks(blocks),
            })
        }
    }
}

/// Pump the typed Claude event stream into the chunk channel.
async fn relay_claude_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<std::result::Result<StreamChunk, LlmError>>,
) {
    let mut feed = SseFeed::new();
    let mut assembler = BlockAssembler::default();
    let mut body = response.bytes_stream();

    while let Some(step) = body.next().await {
        let bytes = match step {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx
                    .send(Err(LlmError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        for payload in feed.push(&bytes) {
            let event = match serde_json::from_str::<StreamEvent>(&payload) {
                Ok(event) => event,
                Err(e) => {
                    trace!(data = %payload, error = %e, "Ignoring unparseable Claude SSE");
                    continue;
                }
            };

            match event {
                StreamEvent::ContentBlockStart {
                    content_block: StartedBlock::ToolUse { id, name },
                } => assembler.begin_tool(id, name),
                StreamEvent::ContentBlockStart { .. } => {}

                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::TextDelta { text },
                } => {
                    let chunk = StreamChunk {
                        content: Some(text),
                        tool_calls: Vec::new(),
                        usage: None,
                        done: false,
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // consumer hung up
                    }
                }
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::InputJsonDelta { partial_json },
                } => assembler.extend_tool_json(&partial_json),
                StreamEvent::ContentBlockDelta { .. } => {}

                StreamEvent::ContentBlockStop {} => assembler.seal_tool(),

                StreamEvent::MessageDelta { usage } => assembler.record_usage(usage),

                StreamEvent::MessageStop {} => {
                    let done = std::mem::take(&mut assembler).into_done_chunk();
                    let _ = tx.send(Ok(done)).await;
                    return;
                }

                StreamEvent::Other => {}
            }
        }
    }

    // Stream ended without message_stop — flush what was assembled.
    let _ = tx.send(Ok(assembler.into_done_chunk())).await;
}

/// Assembles tool_use blocks and usage out of the event stream. One block
/// is open at a time; `input_json_delta` fragments extend it until the
/// matching `content_block_stop`.
#[derive(Default)]
struct BlockAssembler {
    open: Option<OpenToolUse>,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

struct OpenToolUse {
    id: String,
    name: String,
    json: String,
}

impl BlockAssembler {
    fn begin_tool(&mut self, id: String, name: String) {
        self.seal_tool();
        self.open = Some(OpenToolUse {
            id,
            name,
            json: String::new(),
        });
    }

    fn extend_tool_json(&mut self, fragment: &str) {
        if let Some(open) = self.open.as_mut() {
            open.json.push_str(fragment);
        }
    }

    fn seal_tool(&mut self) {
        if let Some(open) = self.open.take() {
            self.calls
                .push(ToolCall::function(open.id, open.name, open.json));
        }
    }

    fn record_usage(&mut self, usage: Option<DeltaUsage>) {
        if let Some(u) = usage {
            let input = u.input_tokens.unwrap_or(0);
            self.usage = Some(Usage {
                prompt_tokens: input,
                completion_tokens: u.output_tokens,
                total_tokens: input + u.output_tokens,
            });
        }
    }

    fn into_done_chunk(mut self) -> StreamChunk {
        self.seal_tool();
        StreamChunk {
            content: None,
            tool_calls: self.calls,
            usage: self.usage,
            done: true,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: ClaudeContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ClaudeContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl From<&Tool> for ClaudeTool {
    fn from(tool: &Tool) -> Self {
        Self {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            input_schema: tool.function.parameters.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    id: String,
    content: Vec<ResponseContentBlock>,
    usage: ClaudeUsage,
}

impl ClaudeResponse {
    fn into_llm_response(self) -> LlmResponse {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();

        for block in self.content {
            match block {
                ResponseContentBlock::Text { text } => text_parts.push(text),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    // Value's Display is compact JSON — the wire form the
                    // tool layer expects
                    tool_calls.push(ToolCall::function(id, name, input.to_string()));
                }
            }
        }

        LlmResponse {
            id: self.id,
            content: text_parts.join("\n"),
            role: "assistant".into(),
            usage: Usage {
                prompt_tokens: self.usage.input_tokens,
                completion_tokens: self.usage.output_tokens,
                total_tokens: self.usage.input_tokens + self.usage.output_tokens,
            },
            tool_calls,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// --- Streaming SSE events ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockStart {
        content_block: StartedBlock,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartedBlock {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    output_tokens: u32,
}
