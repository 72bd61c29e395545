//! OpenAI-compatible client implementation.
//!
//! Works with: OpenAI, DeepSeek, Ollama, and any endpoint exposing an
//! OpenAI-compatible `/v1/chat/completions` API.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Incremental tool-call reassembly keyed by delta `index`

use crate::sse::SseFeed;
use async_trait::async_trait;
use ferrocode_core::error::LlmError;
use ferrocode_core::llm::{LlmClient, LlmConfig, LlmProvider, LlmRequest, LlmResponse, StreamChunk, Usage};
use ferrocode_core::message::{Message, ToolCall};
use ferrocode_core::tool::Tool;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const DEFAULT_DEEPSEEK_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/v1";

/// An OpenAI-compatible LLM client.
///
/// This handles the majority of providers since most expose an
/// OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatClient {
    provider: LlmProvider,
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a client for an arbitrary OpenAI-compatible endpoint.
    pub fn new(provider: LlmProvider, mut config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.provider = provider;

        Self {
            provider,
            config,
            client,
        }
    }

    /// Create an OpenAI client (convenience constructor).
    pub fn openai(mut config: LlmConfig) -> Self {
        if config.base_url.is_empty() {
            config.base_url = DEFAULT_OPENAI_URL.into();
        }
        Self::new(LlmProvider::OpenAi, config)
    }

    /// Create a DeepSeek client (convenience constructor).
    pub fn deepseek(mut config: LlmConfig) -> Self {
        if config.base_url.is_empty() {
            config.base_url = DEFAULT_DEEPSEEK_URL.into();
        }
        Self::new(LlmProvider::DeepSeek, config)
    }

    /// Create an Ollama client (convenience constructor). Ollama does not
    /// require a real API key.
    pub fn ollama(mut config: LlmConfig) -> Self {
        if config.base_url.is_empty() {
            config.base_url = DEFAULT_OLLAMA_URL.into();
        }
        if config.api_key.is_empty() {
            config.api_key = "ollama".into();
        }
        Self::new(LlmProvider::Ollama, config)
    }

    fn resolved_model(&self, request: &LlmRequest) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone())
    }

    fn resolved_max_tokens(&self, request: &LlmRequest) -> u32 {
        request.max_tokens.unwrap_or(self.config.max_tokens)
    }

    fn resolved_temperature(&self, request: &LlmRequest) -> f32 {
        request.temperature.unwrap_or(self.config.temperature)
    }

    /// Assemble the request body. Tool fields are present only when the
    /// request carries tools; streaming requests also ask the provider to
    /// report usage on the final chunk.
    fn request_body(&self, request: &LlmRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<ApiMessage> = request.messages.iter().map(ApiMessage::from).collect();

        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.resolved_model(request).into());
        body.insert("messages".into(), serde_json::json!(messages));
        body.insert("max_tokens".into(), self.resolved_max_tokens(request).into());
        body.insert(
            "temperature".into(),
            serde_json::json!(self.resolved_temperature(request)),
        );
        body.insert("stream".into(), stream.into());

        if stream {
            body.insert(
                "stream_options".into(),
                serde_json::json!({ "include_usage": true }),
            );
        }
        if !request.tools.is_empty() {
            let tools: Vec<ApiToolDefinition> =
                request.tools.iter().map(ApiToolDefinition::from).collect();
            body.insert("tools".into(), serde_json::json!(tools));
            body.insert("tool_choice".into(), "auto".into());
        }

        serde_json::Value::Object(body)
    }

    /// POST the body and map any non-200 status to the matching error.
    async fn post(
        &self,
        body: &serde_json::Value,
        sse: bool,
    ) -> std::result::Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
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
        warn!(provider = %self.provider, status, body = %detail, "Provider returned error");
        Err(match status {
            429 => LlmError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => LlmError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            _ => LlmError::ApiError {
                status_code: status,
                message: detail,
            },
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider(&self) -> LlmProvider {
        self.provider
    }

    fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn chat(&self, request: LlmRequest) -> std::result::Result<LlmResponse, LlmError> {
        debug!(provider = %self.provider, model = %self.resolved_model(&request), "Sending completion request");

        let body = self.request_body(&request, false);
        let response = self.post(&body, false).await?;

        let parsed: ApiResponse = response.json().await.map_err(|e| LlmError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        parsed.into_llm_response()
    }

    async fn chat_stream(
        &self,
        request: LlmRequest,
    ) -> std::result::Result<
        mpsc::Receiver<std::result::Result<StreamChunk, LlmError>>,
        LlmError,
    > {
        debug!(provider = %self.provider, model = %self.resolved_model(&request), "Sending streaming request");

        let body = self.request_body(&request, true);
        let response = self.post(&body, true).await?;

        let (tx, rx) = mpsc::channel(64);
        let provider = self.provider;
        tokio::spawn(async move {
            relay_stream(response, provider, tx).await;
        });

        Ok(rx)
    }
}

/// What handling one SSE payload decided about the stream's future.
enum Relay {
    KeepGoing,
    Finished,
}

/// Pump the provider's SSE body into the chunk channel until a terminal
/// marker, a usage-bearing final chunk, an error, or the consumer going
/// away.
async fn relay_stream(
    response: reqwest::Response,
    provider: LlmProvider,
    tx: mpsc::Sender<std::result::Result<StreamChunk, LlmError>>,
) {
    let mut feed = SseFeed::new();
    let mut partials = PartialCalls::default();
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
            match handle_payload(&payload, provider, &mut partials, &tx).await {
                Relay::KeepGoing => {}
                Relay::Finished => return,
            }
        }
    }

    // Connection closed without a terminal marker; flush what was
    // assembled so the consumer still sees a done chunk.
    let _ = tx
        .send(Ok(StreamChunk {
            content: None,
            tool_calls: partials.assemble(),
            usage: None,
            done: true,
        }))
        .await;
}

async fn handle_payload(
    payload: &str,
    provider: LlmProvider,
    partials: &mut PartialCalls,
    tx: &mpsc::Sender<std::result::Result<StreamChunk, LlmError>>,
) -> Relay {
    if payload == "[DONE]" {
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                tool_calls: partials.assemble(),
                usage: None,
                done: true,
            }))
            .await;
        return Relay::Finished;
    }

    let parsed: StreamResponse = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            trace!(provider = %provider, data = %payload, error = %e, "Ignoring unparseable SSE chunk");
            return Relay::KeepGoing;
        }
    };

    // A usage record marks the provider's final chunk when
    // stream_options.include_usage was requested.
    if let Some(usage) = parsed.usage {
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                tool_calls: partials.assemble(),
                usage: Some(usage.into()),
                done: true,
            }))
            .await;
        return Relay::Finished;
    }

    let Some(choice) = parsed.choices.into_iter().next() else {
        return Relay::KeepGoing;
    };

    if let Some(deltas) = choice.delta.tool_calls {
        partials.absorb(deltas);
    }

    if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
        let chunk = StreamChunk {
            content: Some(text),
            tool_calls: Vec::new(),
            usage: None,
            done: false,
        };
        if tx.send(Ok(chunk)).await.is_err() {
            return Relay::Finished; // consumer hung up
        }
    }

    Relay::KeepGoing
}

/// Tool calls under assembly, keyed by the provider's delta `index`.
///
/// `id` and `name` arrive once (usually on the first fragment) and replace;
/// `arguments` fragments concatenate in arrival order. `assemble` yields the
/// finished calls in index order.
#[derive(Default)]
struct PartialCalls {
    by_index: BTreeMap<u32, PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialCalls {
    fn absorb(&mut self, deltas: Vec<StreamToolCallDelta>) {
        for delta in deltas {
            let slot = self.by_index.entry(delta.index).or_default();
            if delta.id.is_some() {
                slot.id = delta.id;
            }
            let Some(function) = delta.function else {
                continue;
            };
            if function.name.is_some() {
                slot.name = function.name;
            }
            if let Some(fragment) = function.arguments {
                slot.arguments += &fragment;
            }
        }
    }

    fn assemble(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.by_index)
            .into_values()
            .map(|partial| {
                ToolCall::function(
                    partial.id.unwrap_or_default(),
                    partial.name.unwrap_or_default(),
                    partial.arguments,
                )
            })
            .collect()
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for ApiMessage {
    fn from(msg: &Message) -> Self {
        let tool_calls = (!msg.tool_calls.is_empty())
            .then(|| msg.tool_calls.iter().map(ApiToolCall::from).collect());
        Self {
            role: msg.role.to_string(),
            content: Some(msg.content.clone()),
            tool_calls,
            tool_call_id: msg.tool_call_id().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

impl From<&ToolCall> for ApiToolCall {
    fn from(tc: &ToolCall) -> Self {
        Self {
            id: tc.id.clone(),
            r#type: tc.call_type.clone(),
            function: ApiFunction {
                name: tc.function.name.clone(),
                arguments: tc.function.arguments.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

impl From<&Tool> for ApiToolDefinition {
    fn from(tool: &Tool) -> Self {
        Self {
            r#type: tool.tool_type.clone(),
            function: ApiToolFunction {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                parameters: tool.function.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

impl ApiResponse {
    fn into_llm_response(self) -> std::result::Result<LlmResponse, LlmError> {
        let usage = self.usage.map(Usage::from).unwrap_or_default();

        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ApiError {
                status_code: 200,
                message: "response contained no choices".into(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::function(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        Ok(LlmResponse {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            content: choice.message.content.unwrap_or_default(),
            role: "assistant".into(),
            usage,
            tool_calls,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
