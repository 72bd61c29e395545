//! The agent reasoning loop implementation.

use crate::workspace::directory_overview;
use ferrocode_context::{ContextManager, PromptManager};
use ferrocode_core::agent::{AgentState, AgentStatus, ChatRequest, ChatResponse};
use ferrocode_core::error::{Error, Result};
use ferrocode_core::llm::{LlmClient, LlmRequest, Usage};
use ferrocode_core::message::{Message, ToolCall, ToolCallResult};
use ferrocode_tools::ToolEngine;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Agent loop configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Iteration cap per turn
    pub max_loops: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_loops: 50 }
    }
}

/// The agent that orchestrates LLM calls and tool execution.
///
/// Cheap to clone — all state is behind `Arc`s, and the streaming path
/// clones the agent into its producer task.
#[derive(Clone)]
pub struct Agent {
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolEngine>,
    context: Arc<ContextManager>,
    prompts: Arc<PromptManager>,
    statuses: Arc<Mutex<HashMap<String, AgentStatus>>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolEngine>,
        context: Arc<ContextManager>,
        prompts: Arc<PromptManager>,
    ) -> Self {
        Self {
            config,
            llm,
            tools,
            context,
            prompts,
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Process a chat turn to completion.
    ///
    /// When the iteration cap is reached with the model still requesting
    /// tools, the last assistant content is returned as-is and the response
    /// metadata carries `loop_exhausted: true`. With `max_loops == 0` the
    /// LLM is never invoked and an empty successful response is returned.
    pub async fn chat(
        &self,
        cancel: &CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatResponse> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let user_message = Message::user(&request.message).with_metadata(request.metadata);
        self.context.add_message(&session_id, user_message).await?;
        self.set_status(&session_id, AgentStatus::Thinking);

        let outcome = self.run_loop(cancel, &session_id).await;
        match outcome {
            Ok(turn) => {
                self.set_status(&session_id, AgentStatus::Done);
                let mut metadata = serde_json::Map::new();
                metadata.insert("loop_completed".into(), serde_json::json!(true));
                if turn.exhausted {
                    metadata.insert("loop_exhausted".into(), serde_json::json!(true));
                }
                Ok(ChatResponse {
                    session_id,
                    response: turn.response,
                    finished: true,
                    usage: turn.usage,
                    metadata,
                })
            }
            Err(e) => {
                self.set_status(&session_id, AgentStatus::Error);
                Err(e)
            }
        }
    }

    /// Process a chat turn, streaming partial responses.
    ///
    /// Content deltas arrive with `finished == false`; the terminal chunk
    /// has `finished == true` and aggregated usage. Upstream failures
    /// mid-turn close the stream with a final chunk whose metadata carries
    /// the error.
    pub async fn chat_stream(
        &self,
        cancel: &CancellationToken,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<ChatResponse>> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let user_message = Message::user(&request.message).with_metadata(request.metadata);
        self.context.add_message(&session_id, user_message).await?;
        self.set_status(&session_id, AgentStatus::Thinking);

        let (tx, rx) = mpsc::channel(10);
        let agent = self.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            match agent.run_loop_stream(&cancel, &session_id, &tx).await {
                Ok(turn) => {
                    agent.set_status(&session_id, AgentStatus::Done);
                    let mut metadata = serde_json::Map::new();
                    metadata.insert("loop_completed".into(), serde_json::json!(true));
                    if turn.exhausted {
                        metadata.insert("loop_exhausted".into(), serde_json::json!(true));
                    }
                    let _ = tx
                        .send(ChatResponse {
                            session_id: session_id.clone(),
                            response: String::new(),
                            finished: true,
                            usage: turn.usage,
                            metadata,
                        })
                        .await;
                }
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Agent stream failed");
                    agent.set_status(&session_id, AgentStatus::Error);
                    let mut metadata = serde_json::Map::new();
                    metadata.insert("error".into(), serde_json::json!(e.to_string()));
                    let _ = tx
                        .send(ChatResponse {
                            session_id: session_id.clone(),
                            response: format!("Error: {e}"),
                            finished: true,
                            usage: Usage::default(),
                            metadata,
                        })
                        .await;
                }
            }
        });

        Ok(rx)
    }

    /// Snapshot of agent state for a session.
    pub async fn get_state(&self, session_id: &str) -> Result<AgentState> {
        let session = self.context.get_session_context(session_id).await?;
        let status = self
            .statuses
            .lock()
            .expect("status lock poisoned")
            .get(session_id)
            .copied()
            .unwrap_or(AgentStatus::Idle);

        Ok(AgentState {
            session_id: session_id.to_string(),
            status,
            messages: session.messages,
            compressed_history: session.compressed_history,
            active_tools: self.tools.tool_names(),
            last_activity: session.last_activity,
        })
    }

    fn set_status(&self, session_id: &str, status: AgentStatus) {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(session_id.to_string(), status);
    }

    async fn run_loop(&self, cancel: &CancellationToken, session_id: &str) -> Result<TurnOutcome> {
        let mut usage = Usage::default();
        let mut response_text = String::new();
        let mut had_tool_calls = false;

        for iteration in 0..self.config.max_loops {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            debug!(
                session_id = %session_id,
                iteration = iteration + 1,
                max_loops = self.config.max_loops,
                "Agent loop iteration"
            );

            let request = self.build_request(session_id).await?;
            let response = self.llm.chat(request).await.map_err(Error::Llm)?;
            usage.accumulate(&response.usage);

            let assistant = Message::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            );
            self.context.add_message(session_id, assistant).await?;

            response_text = response.content;
            had_tool_calls = !response.tool_calls.is_empty();

            if !had_tool_calls {
                break;
            }

            self.set_status(session_id, AgentStatus::ExecutingTools);
            self.execute_tool_calls(cancel, session_id, &response.tool_calls)
                .await?;
            self.set_status(session_id, AgentStatus::Thinking);
        }

        if had_tool_calls {
            warn!(
                session_id = %session_id,
                max_loops = self.config.max_loops,
                "Loop cap reached with pending tool calls"
            );
        }

        Ok(TurnOutcome {
            response: response_text,
            usage,
            exhausted: had_tool_calls,
        })
    }

    async fn run_loop_stream(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        tx: &mpsc::Sender<ChatResponse>,
    ) -> Result<TurnOutcome> {
        let mut usage = Usage::default();
        let mut response_text = String::new();
        let mut had_tool_calls = false;

        for iteration in 0..self.config.max_loops {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            debug!(
                session_id = %session_id,
                iteration = iteration + 1,
                "Agent stream loop iteration"
            );

            let mut request = self.build_request(session_id).await?;
            request.stream = true;

            let mut chunks = self.llm.chat_stream(request).await.map_err(Error::Llm)?;

            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            while let Some(chunk) = chunks.recv().await {
                let chunk = chunk.map_err(Error::Llm)?;

                if let Some(delta) = chunk.content {
                    if !delta.is_empty() {
                        content.push_str(&delta);
                        let _ = tx
                            .send(ChatResponse {
                                session_id: session_id.to_string(),
                                response: delta,
                                finished: false,
                                usage: Usage::default(),
                                metadata: serde_json::Map::new(),
                            })
                            .await;
                    }
                }
                if !chunk.tool_calls.is_empty() {
                    tool_calls.extend(chunk.tool_calls);
                }
                if let Some(u) = chunk.usage {
                    usage.accumulate(&u);
                }
                if chunk.done {
                    break;
                }
            }

            let assistant = Message::assistant_with_tools(content.clone(), tool_calls.clone());
            self.context.add_message(session_id, assistant).await?;

            response_text = content;
            had_tool_calls = !tool_calls.is_empty();

            if !had_tool_calls {
                debug!(session_id = %session_id, "No tool calls, ending stream loop");
                break;
            }

            self.set_status(session_id, AgentStatus::ExecutingTools);
            self.execute_tool_calls(cancel, session_id, &tool_calls).await?;
            self.set_status(session_id, AgentStatus::Thinking);
        }

        Ok(TurnOutcome {
            response: response_text,
            usage,
            exhausted: had_tool_calls,
        })
    }

    /// Compose the LLM request: rendered system and environment prompts,
    /// the session history snapshot, and all enabled tool definitions.
    async fn build_request(&self, session_id: &str) -> Result<LlmRequest> {
        let system_prompt = match self.prompts.get_with_data(
            "system",
            minijinja::context! { model_provider => self.llm.provider().to_string() },
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to render system prompt, using fallback");
                "You are a helpful AI assistant.".to_string()
            }
        };

        let pwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        let file_structure = match directory_overview(&pwd, 200, &[]) {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "Failed to build workspace overview");
                "unknown".to_string()
            }
        };

        let user_info = match self.prompts.get_with_data(
            "user_info",
            minijinja::context! {
                os => std::env::consts::OS,
                pwd => pwd.to_string_lossy(),
                shell => std::env::var("SHELL").unwrap_or_default(),
                date => chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                file_structure => file_structure,
            },
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to render user_info prompt");
                String::new()
            }
        };

        let history = self.context.get_messages(session_id).await;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.push(Message::user(user_info));
        messages.extend(history);

        let mut request = LlmRequest::from_messages(messages);
        request.tools = self.tools.definitions();
        Ok(request)
    }

    /// Run a batch of tool calls and append one tool-role message per
    /// result. Tool failures are not fatal — the model sees them and can
    /// recover. Storage failures are.
    async fn execute_tool_calls(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        tool_calls: &[ToolCall],
    ) -> Result<()> {
        info!(
            session_id = %session_id,
            count = tool_calls.len(),
            "Executing tool calls"
        );

        let results = self.tools.execute_tools(cancel, tool_calls).await;

        for (call, result) in tool_calls.iter().zip(&results) {
            let mut metadata = HashMap::new();
            metadata.insert("tool_call_id".to_string(), call.id.clone());
            metadata.insert("tool_name".to_string(), call.function.name.clone());
            metadata.insert("success".to_string(), result.success.to_string());

            let message = Message::tool(format_tool_result(call, result), metadata);
            self.context.add_message(session_id, message).await?;
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

struct TurnOutcome {
    response: String,
    usage: Usage,
    exhausted: bool,
}

/// Human-readable rendering of a tool result for the conversation log.
fn format_tool_result(call: &ToolCall, result: &ToolCallResult) -> String {
    let mut output = String::new();
    output.push_str(&format!("Tool: {}\n", call.function.name));
    output.push_str(&format!("Success: {}\n", result.success));
    if !result.error.is_empty() {
        output.push_str(&format!("Error: {}\n", result.error));
    }
    if !result.content.is_empty() {
        output.push_str(&format!("Output:\n{}", result.content));
    }
    output
}
